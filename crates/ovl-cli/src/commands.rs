use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::SecondsFormat;
use colored::Colorize;
use ovl_merge::{commit_directory, MergeConfig, UnionMerger};
use ovl_repo::{CheckoutMode, Repo, RepoConfig, TreeStore};
use ovl_store::{EntryMode, TreeEntry};
use serde_json::json;
use tracing::debug;

use crate::cli::*;

/// Subdirectories of the storage directory merged automatically, in order.
const STORAGE_LAYERS: [&str; 4] = ["changes", "splash", "dt", "kernel"];

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    debug!(command = cli.command.name(), ?format, "dispatching");
    match cli.command {
        Command::Init(args) => cmd_init(args, format),
        Command::Commit(args) => cmd_commit(args, format),
        Command::Checkout(args) => cmd_checkout(args, format),
        Command::RevParse(args) => cmd_rev_parse(args, format),
        Command::Ls(args) => cmd_ls(args, format),
        Command::Branches(args) => cmd_branches(args, format),
        Command::Union(args) => cmd_union(args, format),
    }
}

fn open(args: &RepoArgs) -> anyhow::Result<Repo> {
    Repo::open(&args.repo).with_context(|| format!("cannot open {}", args.repo.display()))
}

fn emit_json(value: serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cmd_init(args: InitArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = if args.bare {
        RepoConfig::bare()
    } else {
        RepoConfig::default()
    };
    Repo::create(&args.path, config)?;
    let mode = if args.bare { "bare" } else { "archive" };
    match format {
        OutputFormat::Json => emit_json(json!({ "path": args.path, "mode": mode })),
        OutputFormat::Text => {
            println!(
                "{} Initialized {} repository in {}",
                "✓".green().bold(),
                mode,
                args.path.display().to_string().bold()
            );
            Ok(())
        }
    }
}

fn cmd_commit(args: CommitArgs, format: OutputFormat) -> anyhow::Result<()> {
    let repo = open(&args.repo)?;
    let commit = commit_directory(
        &repo,
        &args.dir,
        &args.branch,
        args.subject.as_deref(),
        args.body.as_deref(),
    )?;
    match format {
        OutputFormat::Json => emit_json(json!({ "branch": args.branch, "commit": commit.to_hex() })),
        OutputFormat::Text => {
            println!(
                "{} Committed {} to {}",
                "✓".green().bold(),
                args.dir.display(),
                args.branch.yellow()
            );
            println!("  Commit: {}", commit.to_hex().cyan());
            Ok(())
        }
    }
}

fn cmd_checkout(args: CheckoutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let repo = open(&args.repo)?;
    let commit = repo.resolve_rev(&args.rev)?;
    let mode = if args.whiteouts {
        CheckoutMode::OverlayWhiteouts
    } else {
        CheckoutMode::Union
    };
    let stats = repo.checkout(&commit, &args.dir, mode)?;
    match format {
        OutputFormat::Json => emit_json(json!({
            "commit": commit.to_hex(),
            "files_written": stats.files_written,
            "dirs_created": stats.dirs_created,
            "whiteouts_applied": stats.whiteouts_applied,
        })),
        OutputFormat::Text => {
            println!(
                "{} Checked out {} into {}",
                "✓".green().bold(),
                commit.short_hex().cyan(),
                args.dir.display()
            );
            println!(
                "  {} files, {} directories, {} whiteouts",
                stats.files_written, stats.dirs_created, stats.whiteouts_applied
            );
            Ok(())
        }
    }
}

fn cmd_rev_parse(args: RevParseArgs, format: OutputFormat) -> anyhow::Result<()> {
    let repo = open(&args.repo)?;
    let commit = repo.resolve_rev(&args.rev)?;
    match format {
        OutputFormat::Json => emit_json(json!({ "rev": args.rev, "commit": commit.to_hex() })),
        OutputFormat::Text => {
            println!("{commit}");
            Ok(())
        }
    }
}

fn mode_label(mode: EntryMode) -> &'static str {
    match mode {
        EntryMode::Regular => "file",
        EntryMode::Executable => "exec",
        EntryMode::Symlink => "link",
        EntryMode::Directory => "dir",
    }
}

fn cmd_ls(args: LsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let repo = open(&args.repo)?;
    let commit = repo.resolve_rev(&args.rev)?;
    let entries: Vec<(String, TreeEntry)> = if args.recursive {
        let prefix = args.path.trim_matches('/');
        repo.walk(&commit)?
            .into_iter()
            .filter(|(path, _)| {
                prefix.is_empty()
                    || path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .collect()
    } else {
        repo.ls(&commit, &args.path)?
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect()
    };

    match format {
        OutputFormat::Json => emit_json(json!(entries
            .iter()
            .map(|(path, entry)| json!({
                "path": path,
                "mode": mode_label(entry.mode),
                "object": entry.object_id.to_hex(),
            }))
            .collect::<Vec<_>>())),
        OutputFormat::Text => {
            for (path, entry) in &entries {
                let name = if entry.mode.is_dir() {
                    format!("{path}/").blue().bold()
                } else {
                    path.normal()
                };
                println!(
                    "{:>4}  {}  {}",
                    mode_label(entry.mode).dimmed(),
                    entry.object_id.short_hex().dimmed(),
                    name
                );
            }
            Ok(())
        }
    }
}

fn cmd_branches(args: RepoArgs, format: OutputFormat) -> anyhow::Result<()> {
    let repo = open(&args)?;
    let branches = repo.branches()?;
    match format {
        OutputFormat::Json => emit_json(json!(branches
            .iter()
            .map(|b| json!({ "name": b.name, "commit": b.target.to_hex() }))
            .collect::<Vec<_>>())),
        OutputFormat::Text => {
            if branches.is_empty() {
                println!("No branches.");
            }
            for branch in &branches {
                println!("{}  {}", branch.target.short_hex().dimmed(), branch.name.yellow());
            }
            Ok(())
        }
    }
}

/// The [`STORAGE_LAYERS`] present under `storage`, then the explicit
/// directories in order.
fn changes_layers(storage: &Path, extra: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut layers: Vec<PathBuf> = STORAGE_LAYERS
        .iter()
        .map(|name| storage.join(name))
        .filter(|dir| dir.is_dir())
        .collect();
    for dir in extra {
        if !dir.is_dir() {
            bail!("changes directory {} does not exist", dir.display());
        }
        layers.push(dir.clone());
    }
    if layers.is_empty() {
        bail!(
            "nothing to merge: none of {} exist under {} and no --changes-directory given",
            STORAGE_LAYERS.join(", "),
            storage.display()
        );
    }
    Ok(layers)
}

/// `STORAGE/<dir>` for layers under the storage directory, `WORKDIR/<dir>`
/// for relative paths, the path itself otherwise.
fn layer_label(storage: &Path, layer: &Path) -> String {
    if let Ok(rest) = layer.strip_prefix(storage) {
        format!("STORAGE/{}", rest.display())
    } else if layer.is_relative() {
        format!("WORKDIR/{}", layer.display())
    } else {
        layer.display().to_string()
    }
}

fn default_subject() -> String {
    format!(
        "ovl union {}",
        chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

fn cmd_union(args: UnionArgs, format: OutputFormat) -> anyhow::Result<()> {
    if !args.storage.is_dir() {
        bail!("storage directory {} does not exist", args.storage.display());
    }
    let layers = changes_layers(&args.storage, &args.changes_dirs)?;
    let repo = open(&args.repo)?;

    let subject = args.subject.clone().unwrap_or_else(default_subject);
    debug!(subject = %subject, body = ?args.body, "union");
    let config = MergeConfig {
        base_ref: args.base.clone(),
        subject: Some(subject),
        body: args.body.clone(),
        ..MergeConfig::default()
    };
    let merger = UnionMerger::new(&repo, &args.storage).with_config(config);
    let text = format == OutputFormat::Text;
    let commit = merger.merge_layers(&args.base, &layers, &args.branch, |layer| {
        if text {
            let label = layer_label(&args.storage, layer);
            println!("Applying changes from {}.", label.bold());
        }
    })?;

    match format {
        OutputFormat::Json => emit_json(json!({
            "base": args.base,
            "branch": args.branch,
            "layers": layers,
            "commit": commit.to_hex(),
        })),
        OutputFormat::Text => {
            println!(
                "{} Commit {} has been generated for changes and is ready to be deployed.",
                "✓".green().bold(),
                commit.to_hex().cyan()
            );
            println!("  Branch: {}", args.branch.yellow());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn storage_changes_dir_comes_first() {
        let storage = tempfile::tempdir().unwrap();
        fs::create_dir(storage.path().join("changes")).unwrap();
        let extra = tempfile::tempdir().unwrap();
        let layers = changes_layers(storage.path(), &[extra.path().to_path_buf()]).unwrap();
        assert_eq!(layers, [storage.path().join("changes"), extra.path().to_path_buf()]);
    }

    #[test]
    fn storage_layers_follow_fixed_order() {
        let storage = tempfile::tempdir().unwrap();
        for name in ["kernel", "dt", "changes", "splash"] {
            fs::create_dir(storage.path().join(name)).unwrap();
        }
        fs::create_dir(storage.path().join("unrelated")).unwrap();
        let layers = changes_layers(storage.path(), &[]).unwrap();
        let expected: Vec<PathBuf> = ["changes", "splash", "dt", "kernel"]
            .iter()
            .map(|name| storage.path().join(name))
            .collect();
        assert_eq!(layers, expected);
    }

    #[test]
    fn absent_storage_layers_are_skipped() {
        let storage = tempfile::tempdir().unwrap();
        fs::create_dir(storage.path().join("dt")).unwrap();
        fs::write(storage.path().join("splash"), b"not a directory").unwrap();
        let layers = changes_layers(storage.path(), &[]).unwrap();
        assert_eq!(layers, [storage.path().join("dt")]);
    }

    #[test]
    fn layers_are_labelled_by_origin() {
        let storage = Path::new("/work/storage");
        assert_eq!(
            layer_label(storage, &storage.join("changes")),
            "STORAGE/changes"
        );
        assert_eq!(
            layer_label(storage, Path::new("extra/overlay")),
            "WORKDIR/extra/overlay"
        );
        assert_eq!(layer_label(storage, Path::new("/elsewhere")), "/elsewhere");
        assert_eq!(
            layer_label(Path::new("."), &Path::new(".").join("kernel")),
            "STORAGE/kernel"
        );
    }

    #[test]
    fn default_subject_is_timestamped() {
        let subject = default_subject();
        let stamp = subject.strip_prefix("ovl union ").unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[test]
    fn no_layers_is_an_error() {
        let storage = tempfile::tempdir().unwrap();
        assert!(changes_layers(storage.path(), &[]).is_err());
    }

    #[test]
    fn missing_extra_dir_is_an_error() {
        let storage = tempfile::tempdir().unwrap();
        let err = changes_layers(storage.path(), &[storage.path().join("nope")]).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn cli_parses_union() {
        use clap::Parser;
        let cli = Cli::try_parse_from([
            "ovl",
            "--verbose",
            "union",
            "--repo",
            "r",
            "--storage",
            "s",
            "--changes-directory",
            "a",
            "--changes-directory",
            "b",
            "--subject",
            "hello",
            "custom",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Union(args) = cli.command else {
            panic!("expected union");
        };
        assert_eq!(args.changes_dirs, [PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(args.base, "base");
        assert_eq!(args.branch, "custom");
    }

    #[test]
    fn command_names_match_subcommands() {
        use clap::Parser;
        for (argv, name) in [
            (vec!["ovl", "branches", "--repo", "r"], "branches"),
            (vec!["ovl", "rev-parse", "--repo", "r", "base"], "rev-parse"),
            (vec!["ovl", "init", "r"], "init"),
        ] {
            assert_eq!(Cli::try_parse_from(argv).unwrap().command.name(), name);
        }
    }

    #[test]
    fn commit_then_rev_parse_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let repo_path = dir.path().join("repo");
        cmd_init(
            InitArgs {
                path: repo_path.clone(),
                bare: false,
            },
            OutputFormat::Json,
        )
        .unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("f"), b"x").unwrap();

        cmd_commit(
            CommitArgs {
                repo: RepoArgs {
                    repo: repo_path.clone(),
                },
                branch: "base".into(),
                dir: src,
                subject: None,
                body: None,
            },
            OutputFormat::Json,
        )
        .unwrap();

        let repo = Repo::open(&repo_path).unwrap();
        assert_eq!(repo.branches().unwrap()[0].name, "base");
    }
}
