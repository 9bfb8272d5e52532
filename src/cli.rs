use std::path::{Path, PathBuf};

use crate::index::NodeRef;

pub const USAGE: &str = "\
Usage: studytree <command> <folder> [targets]

Commands:
  scan <folder>                 rebuild the index from the files, keeping flags
  tree <folder>                 print the Subject/Study/Series/Image tree
  checked <folder>              print the paths of checked images
  check <folder> <target>...    check nodes
  uncheck <folder> <target>...  uncheck nodes
  delete <folder> <image>...    delete image files and drop them from the index

Targets are image paths, or one of
  --subject <id>
  --study <subject> <study>
  --series <subject> <study> <series>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Scan {
        folder: PathBuf,
    },
    Tree {
        folder: PathBuf,
    },
    Checked {
        folder: PathBuf,
    },
    SetChecked {
        folder: PathBuf,
        targets: Vec<NodeRef>,
        value: bool,
    },
    Delete {
        folder: PathBuf,
        paths: Vec<PathBuf>,
    },
}

impl Command {
    pub fn folder(&self) -> &Path {
        match self {
            Self::Scan { folder }
            | Self::Tree { folder }
            | Self::Checked { folder }
            | Self::SetChecked { folder, .. }
            | Self::Delete { folder, .. } => folder,
        }
    }
}

/// `Ok(None)` when there is nothing to do (no arguments or a help flag).
pub fn parse_command_from_args(args: &[String]) -> Result<Option<Command>, String> {
    let Some(name) = args.first() else {
        return Ok(None);
    };
    if matches!(name.as_str(), "-h" | "--help" | "help") {
        return Ok(None);
    }

    let folder = args
        .get(1)
        .map(PathBuf::from)
        .ok_or_else(|| format!("Missing folder after {name}."))?;
    let rest = &args[2..];

    let command = match name.as_str() {
        "scan" | "tree" | "checked" => {
            if let Some(extra) = rest.first() {
                return Err(format!("Unexpected argument '{extra}' for {name}."));
            }
            match name.as_str() {
                "scan" => Command::Scan { folder },
                "tree" => Command::Tree { folder },
                _ => Command::Checked { folder },
            }
        }
        "check" | "uncheck" => Command::SetChecked {
            folder,
            targets: parse_targets(rest)?,
            value: name == "check",
        },
        "delete" => {
            if rest.is_empty() {
                return Err("Missing image path(s) after delete.".to_string());
            }
            if let Some(flag) = rest.iter().find(|arg| arg.starts_with("--")) {
                return Err(format!("delete takes image paths only, got {flag}."));
            }
            Command::Delete {
                folder,
                paths: rest.iter().map(PathBuf::from).collect(),
            }
        }
        other => return Err(format!("Unknown command '{other}'.")),
    };
    Ok(Some(command))
}

fn parse_targets(args: &[String]) -> Result<Vec<NodeRef>, String> {
    if args.is_empty() {
        return Err("Missing target(s).".to_string());
    }

    let mut targets = Vec::new();
    let mut position = 0;
    while position < args.len() {
        let arg = args[position].as_str();
        let arity = match arg {
            "--subject" => 1,
            "--study" => 2,
            "--series" => 3,
            flag if flag.starts_with("--") => return Err(format!("Unknown target flag {flag}.")),
            path => {
                targets.push(NodeRef::image(path));
                position += 1;
                continue;
            }
        };

        let values = args
            .get(position + 1..position + 1 + arity)
            .filter(|values| values.iter().all(|value| !value.starts_with("--")))
            .ok_or_else(|| format!("{arg} needs {arity} value(s)."))?;
        targets.push(match values {
            [subject] => NodeRef::subject(subject),
            [subject, study] => NodeRef::study(subject, study),
            [subject, study, series] => NodeRef::series(subject, study, series),
            _ => return Err(format!("{arg} needs {arity} value(s).")),
        });
        position += 1 + arity;
    }
    Ok(targets)
}
