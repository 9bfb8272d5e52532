use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use studytree::cli::{self, Command};
use studytree::{Config, DicomFileAdapter, Error, HierarchyIndex, NodeRef, Session};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let command = match cli::parse_command_from_args(&cli_args) {
        Ok(Some(command)) => command,
        Ok(None) => {
            println!("{}", cli::USAGE);
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("Argument error: {err}\n\n{}", cli::USAGE);
            return ExitCode::from(2);
        }
    };

    match run(command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    let mut session = Session::open(command.folder(), DicomFileAdapter, Config::from_env())
        .with_context(|| format!("Could not open {}", command.folder().display()))?;

    match command {
        Command::Scan { .. } => {
            session.refresh(|done, total| log::debug!("Scanned {done}/{total}"));
            session.save()?;
            println!(
                "Indexed {} image(s) into {}",
                session.index().image_count(),
                session.index_path().display()
            );
        }
        Command::Tree { .. } => print!("{}", render_tree(session.index())),
        Command::Checked { .. } => {
            for path in session.index().query().checked_image_paths() {
                println!("{}", path.display());
            }
        }
        Command::SetChecked {
            folder,
            targets,
            value,
        } => {
            for target in targets {
                let target = match target {
                    NodeRef::Image(path) => {
                        NodeRef::Image(resolve_image_path(session.index(), &folder, path))
                    }
                    node => node,
                };
                session.index_mut().set_checked(&target, value)?;
            }
            session.save()?;
        }
        Command::Delete { folder, paths } => {
            let paths = paths
                .into_iter()
                .map(|path| resolve_image_path(session.index(), &folder, path))
                .collect::<Vec<_>>();
            let outcome = session.mutator().delete_images(&paths);
            // Whatever was deleted is gone from disk; persist that before reporting.
            session.save()?;
            match outcome {
                Ok(changes) => println!("Deleted {} image(s)", changes.removed_paths.len()),
                Err(Error::PartialWrite(partial)) => {
                    anyhow::bail!("Deleted {} image(s); {partial}", partial.succeeded.len())
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
    Ok(())
}

/// Image paths given relative to the folder are matched against the index.
fn resolve_image_path(index: &HierarchyIndex, folder: &Path, path: PathBuf) -> PathBuf {
    if index.contains_path(&path) || path.is_absolute() {
        return path;
    }
    let joined = folder.join(&path);
    if index.contains_path(&joined) {
        joined
    } else {
        path
    }
}

fn render_tree(index: &HierarchyIndex) -> String {
    let mut out = String::new();
    let mark = |checked: bool| if checked { "[x]" } else { "[ ]" };
    for subject in index.subjects() {
        out.push_str(&format!("{} {}\n", mark(subject.checked), subject.id));
        for study in &subject.studies {
            out.push_str(&format!("  {} {}\n", mark(study.checked), study.id));
            for series in &study.series {
                out.push_str(&format!(
                    "    {} {} ({} image(s))\n",
                    mark(series.checked),
                    series.id,
                    series.images.len()
                ));
                for image in &series.images {
                    out.push_str(&format!(
                        "      {} {}  {}\n",
                        mark(image.checked),
                        image.label,
                        image.path.display()
                    ));
                }
            }
        }
    }
    out
}
