//! Shell commands and the session that runs them

use crate::error::{Result, ShellError};
use std::fmt::Write as _;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use vellum::{
    CancelFlag, Context, CopyMode, PublishOptions, PublishTarget, Repository, TracingReport, View,
    WriteRequest,
};

pub const HELP: &str = "\
Commands:
  write <path> <text>           create or update a file
  set <path> <name> <value>     set a property on one path
  unset <path> <name>           remove a property
  read <path> [--online]        print file content
  ls [path] [--online]          list a folder
  stat <path> [--online]        print the resource record
  mkdir <path>                  create a folder
  rm <path> [--siblings]        delete, optionally with claimable siblings
  cp <src> <dst> [--sibling]    copy as a new file or as a sibling
  touch <path>                  mark a resource changed
  lock <path> | unlock <path>   advisory locks
  publish [path] [--siblings] [--all-siblings] [--subtree]
  versions <path>               list history snapshots
  restore <path> <tag>          restore a snapshot into the offline view
  projects                      list projects
  project create <name> [managers] [users]
  project use|delete <name>
  project add <name> <path>     restrict a project to a subtree
  actor <name>                  switch the acting user
  props                         list property definitions
  status                        pending changes of the current project
  help | quit";

/// One parsed shell line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Write { path: String, content: String },
    SetProperty { path: String, name: String, value: Option<String> },
    Read { path: String, view: View },
    List { path: String, view: View },
    Stat { path: String, view: View },
    Mkdir { path: String },
    Remove { path: String, siblings: bool },
    Copy { source: String, destination: String, mode: CopyMode },
    Touch { path: String },
    Lock { path: String },
    Unlock { path: String },
    Publish {
        path: Option<String>,
        siblings: bool,
        all_siblings: bool,
        subtree: bool,
    },
    Versions { path: String },
    Restore { path: String, tag: u64 },
    Projects,
    ProjectCreate {
        name: String,
        manager_group: String,
        user_group: String,
    },
    ProjectUse { name: String },
    ProjectDelete { name: String },
    ProjectAdd { name: String, path: String },
    Actor { name: String },
    Properties,
    Status,
    Help,
    Quit,
}

/// Split off the first word of `line`
fn next_word(line: &str) -> (&str, &str) {
    let line = line.trim_start();
    match line.find(char::is_whitespace) {
        Some(end) => (&line[..end], line[end..].trim_start()),
        None => (line, ""),
    }
}

/// Positional words and `--flags` of the remaining arguments
struct Args<'a> {
    words: Vec<&'a str>,
    flags: Vec<&'a str>,
}

impl<'a> Args<'a> {
    fn parse(rest: &'a str, allowed: &[&str]) -> Result<Self> {
        let mut words = Vec::new();
        let mut flags = Vec::new();
        for token in rest.split_whitespace() {
            match token.strip_prefix("--") {
                Some(flag) if allowed.contains(&flag) => flags.push(flag),
                Some(flag) => return Err(ShellError::Parse(format!("unknown flag --{}", flag))),
                None => words.push(token),
            }
        }
        Ok(Self { words, flags })
    }

    fn has(&self, flag: &str) -> bool {
        self.flags.contains(&flag)
    }

    fn view(&self) -> View {
        if self.has("online") {
            View::Online
        } else {
            View::Offline
        }
    }

    fn exactly<const N: usize>(&self, usage: &str) -> Result<[&'a str; N]> {
        <[&'a str; N]>::try_from(self.words.as_slice())
            .map_err(|_| ShellError::Parse(format!("usage: {}", usage)))
    }
}

fn required<'a>(word: &'a str, usage: &str) -> Result<&'a str> {
    if word.is_empty() {
        Err(ShellError::Parse(format!("usage: {}", usage)))
    } else {
        Ok(word)
    }
}

impl Command {
    /// Parse a shell line. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let (name, rest) = next_word(line);

        let command = match name {
            "write" => {
                let (path, content) = next_word(rest);
                Command::Write {
                    path: required(path, "write <path> <text>")?.to_string(),
                    content: content.to_string(),
                }
            }
            "set" => {
                let (path, rest) = next_word(rest);
                let (name, value) = next_word(rest);
                let usage = "set <path> <name> <value>";
                Command::SetProperty {
                    path: required(path, usage)?.to_string(),
                    name: required(name, usage)?.to_string(),
                    value: Some(required(value, usage)?.to_string()),
                }
            }
            "unset" => {
                let [path, name] = Args::parse(rest, &[])?.exactly("unset <path> <name>")?;
                Command::SetProperty {
                    path: path.to_string(),
                    name: name.to_string(),
                    value: None,
                }
            }
            "read" | "cat" => {
                let args = Args::parse(rest, &["online"])?;
                let [path] = args.exactly("read <path> [--online]")?;
                Command::Read {
                    path: path.to_string(),
                    view: args.view(),
                }
            }
            "ls" => {
                let args = Args::parse(rest, &["online"])?;
                let path = match args.words.as_slice() {
                    [] => "/",
                    [path] => *path,
                    _ => return Err(ShellError::Parse("usage: ls [path] [--online]".to_string())),
                };
                Command::List {
                    path: path.to_string(),
                    view: args.view(),
                }
            }
            "stat" => {
                let args = Args::parse(rest, &["online"])?;
                let [path] = args.exactly("stat <path> [--online]")?;
                Command::Stat {
                    path: path.to_string(),
                    view: args.view(),
                }
            }
            "mkdir" => {
                let [path] = Args::parse(rest, &[])?.exactly("mkdir <path>")?;
                Command::Mkdir {
                    path: path.to_string(),
                }
            }
            "rm" => {
                let args = Args::parse(rest, &["siblings"])?;
                let [path] = args.exactly("rm <path> [--siblings]")?;
                Command::Remove {
                    path: path.to_string(),
                    siblings: args.has("siblings"),
                }
            }
            "cp" => {
                let args = Args::parse(rest, &["sibling"])?;
                let [source, destination] = args.exactly("cp <src> <dst> [--sibling]")?;
                Command::Copy {
                    source: source.to_string(),
                    destination: destination.to_string(),
                    mode: if args.has("sibling") {
                        CopyMode::AsSibling
                    } else {
                        CopyMode::AsNew
                    },
                }
            }
            "touch" => {
                let [path] = Args::parse(rest, &[])?.exactly("touch <path>")?;
                Command::Touch {
                    path: path.to_string(),
                }
            }
            "lock" => {
                let [path] = Args::parse(rest, &[])?.exactly("lock <path>")?;
                Command::Lock {
                    path: path.to_string(),
                }
            }
            "unlock" => {
                let [path] = Args::parse(rest, &[])?.exactly("unlock <path>")?;
                Command::Unlock {
                    path: path.to_string(),
                }
            }
            "publish" => {
                let args = Args::parse(rest, &["siblings", "all-siblings", "subtree"])?;
                let path = match args.words.as_slice() {
                    [] => None,
                    [path] => Some(path.to_string()),
                    _ => return Err(ShellError::Parse("usage: publish [path] [flags]".to_string())),
                };
                if path.is_none() && !args.flags.is_empty() {
                    return Err(ShellError::Parse(
                        "publish flags need a resource path".to_string(),
                    ));
                }
                Command::Publish {
                    path,
                    siblings: args.has("siblings"),
                    all_siblings: args.has("all-siblings"),
                    subtree: args.has("subtree"),
                }
            }
            "versions" => {
                let [path] = Args::parse(rest, &[])?.exactly("versions <path>")?;
                Command::Versions {
                    path: path.to_string(),
                }
            }
            "restore" => {
                let [path, tag] = Args::parse(rest, &[])?.exactly("restore <path> <tag>")?;
                Command::Restore {
                    path: path.to_string(),
                    tag: tag
                        .parse()
                        .map_err(|_| ShellError::Parse(format!("invalid tag: {}", tag)))?,
                }
            }
            "projects" => Command::Projects,
            "project" => Self::parse_project(rest)?,
            "actor" => {
                let [name] = Args::parse(rest, &[])?.exactly("actor <name>")?;
                Command::Actor {
                    name: name.to_string(),
                }
            }
            "props" => Command::Properties,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(ShellError::Parse(format!("unknown command: {}", other))),
        };
        Ok(Some(command))
    }

    fn parse_project(rest: &str) -> Result<Self> {
        let (action, rest) = next_word(rest);
        let args = Args::parse(rest, &[])?;
        match action {
            "create" => match args.words.as_slice() {
                [name] => Ok(Command::ProjectCreate {
                    name: name.to_string(),
                    manager_group: "Administrators".to_string(),
                    user_group: "Users".to_string(),
                }),
                [name, managers, users] => Ok(Command::ProjectCreate {
                    name: name.to_string(),
                    manager_group: managers.to_string(),
                    user_group: users.to_string(),
                }),
                _ => Err(ShellError::Parse(
                    "usage: project create <name> [managers users]".to_string(),
                )),
            },
            "use" => {
                let [name] = args.exactly("project use <name>")?;
                Ok(Command::ProjectUse {
                    name: name.to_string(),
                })
            }
            "delete" => {
                let [name] = args.exactly("project delete <name>")?;
                Ok(Command::ProjectDelete {
                    name: name.to_string(),
                })
            }
            "add" => {
                let [name, path] = args.exactly("project add <name> <path>")?;
                Ok(Command::ProjectAdd {
                    name: name.to_string(),
                    path: path.to_string(),
                })
            }
            other => Err(ShellError::Parse(format!("unknown project action: {}", other))),
        }
    }
}

/// An interactive session: a repository plus the acting context
pub struct Session {
    repository: Repository,
    ctx: Context,
}

impl Session {
    pub fn new(repository: Repository, actor: &str, project: &str) -> Result<Self> {
        let ctx = repository.context(actor, project)?;
        Ok(Self { repository, ctx })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn prompt(&self) -> String {
        let project = self
            .repository
            .project(&self.ctx.project)
            .map(|p| p.name)
            .unwrap_or_else(|_| self.ctx.project.to_string());
        format!("{}@{}> ", self.ctx.actor, project)
    }

    /// Run one command, returning the text to print
    pub async fn execute(&mut self, command: Command, cancel: CancelFlag) -> Result<String> {
        debug!(?command, actor = %self.ctx.actor, "Executing command");
        let repo = &self.repository;
        let ctx = &self.ctx;

        let output = match command {
            Command::Write { path, content } => {
                let record = repo
                    .write(ctx, &path, WriteRequest::new().content(content))
                    .await?;
                format!("{} {}", record.state.as_str(), record.path)
            }
            Command::SetProperty { path, name, value } => {
                let request = match value {
                    Some(value) => WriteRequest::new().property(name, value),
                    None => WriteRequest::new().remove_property(name),
                };
                let record = repo.write(ctx, &path, request).await?;
                format!("{} {}", record.state.as_str(), record.path)
            }
            Command::Read { path, view } => {
                let content = repo.read_content(view, &path).await?;
                String::from_utf8_lossy(&content).into_owned()
            }
            Command::List { path, view } => {
                let mut out = String::new();
                for child in repo.list_folder(view, &path)? {
                    let marker = if child.is_folder() { "/" } else { "" };
                    let _ = writeln!(
                        out,
                        "{:<10} {}{}",
                        child.state.as_str(),
                        child.path.name(),
                        marker
                    );
                }
                out.trim_end().to_string()
            }
            Command::Stat { path, view } => {
                serde_json::to_string_pretty(&repo.read(view, &path)?)?
            }
            Command::Mkdir { path } => {
                let folder = repo.create_folder(ctx, &path).await?;
                format!("created {}", folder.path)
            }
            Command::Remove { path, siblings } => {
                repo.delete(ctx, &path, siblings).await?;
                format!("deleted {}", path)
            }
            Command::Copy {
                source,
                destination,
                mode,
            } => {
                let copy = repo.copy(ctx, &source, &destination, mode).await?;
                format!("copied {} to {}", source, copy.path)
            }
            Command::Touch { path } => {
                let record = repo.touch(ctx, &path, None).await?;
                format!("touched {}", record.path)
            }
            Command::Lock { path } => {
                let lock = repo.lock(ctx, &path)?;
                format!("locked {} for {}", path, lock.holder)
            }
            Command::Unlock { path } => {
                repo.unlock(&path)?;
                format!("unlocked {}", path)
            }
            Command::Publish {
                path,
                siblings,
                all_siblings,
                subtree,
            } => {
                let target = match path {
                    Some(path) if siblings => PublishTarget::resource_with_siblings(path),
                    Some(path) => PublishTarget::resource(path),
                    None => PublishTarget::Project,
                };
                let options = PublishOptions::new()
                    .cascade_all_siblings(all_siblings)
                    .include_subtree(subtree)
                    .report(Arc::new(TracingReport))
                    .cancel(cancel);
                let report = repo.publish(ctx, target, options).await?;

                let mut out = String::new();
                for entry in &report.entries {
                    let _ = match &entry.detail {
                        Some(detail) => {
                            writeln!(out, "{} {} ({})", entry.outcome, entry.path, detail)
                        }
                        None => writeln!(out, "{} {}", entry.outcome, entry.path),
                    };
                }
                let _ = write!(
                    out,
                    "tag {}: {} published, {} deleted, {} skipped, {} errors{}",
                    report.tag,
                    report.published(),
                    report.deleted(),
                    report.skipped(),
                    report.errors(),
                    if report.cancelled { " (cancelled)" } else { "" }
                );
                out
            }
            Command::Versions { path } => {
                let mut out = String::new();
                for version in repo.list_versions_by_path(&path).await? {
                    let _ = writeln!(
                        out,
                        "{:>6}  {}  {}{}",
                        version.tag,
                        version.published_at.format(&Rfc3339)?,
                        version.published_by,
                        if version.has_payload { "" } else { "  (no content)" }
                    );
                }
                out.trim_end().to_string()
            }
            Command::Restore { path, tag } => {
                let record = repo.restore_version(ctx, &path, tag).await?;
                format!("restored {} from tag {}", record.path, tag)
            }
            Command::Projects => {
                let mut out = String::new();
                for project in repo.list_projects() {
                    let current = if project.id == ctx.project { "*" } else { " " };
                    let _ = writeln!(
                        out,
                        "{} {:<16} {} resources, managers {}, users {}",
                        current,
                        project.name,
                        project.resources.len(),
                        project.manager_group,
                        project.user_group
                    );
                }
                out.trim_end().to_string()
            }
            Command::ProjectCreate {
                name,
                manager_group,
                user_group,
            } => {
                let project = repo
                    .create_project(&name, &manager_group, &user_group)
                    .await?;
                format!("created project {}", project.name)
            }
            Command::ProjectUse { name } => {
                let project = repo.resolve_project(&name)?;
                self.ctx = self.ctx.with_project(project.id);
                format!("using project {}", project.name)
            }
            Command::ProjectDelete { name } => {
                repo.delete_project(&name).await?;
                format!("deleted project {}", name)
            }
            Command::ProjectAdd { name, path } => {
                let project = repo.add_project_resource(&name, &path).await?;
                format!("{} now covers {} paths", project.name, project.resources.len())
            }
            Command::Actor { name } => {
                self.ctx = Context::new(name.as_str(), self.ctx.project);
                format!("acting as {}", name)
            }
            Command::Properties => repo.property_definitions().await.join("\n"),
            Command::Status => {
                let project = repo.project(&ctx.project)?;
                let mut out = String::new();
                for record in repo.owned_resources(&project.name)? {
                    if record.state.is_pending() {
                        let _ = writeln!(out, "{:<10} {}", record.state.as_str(), record.path);
                    }
                }
                if out.is_empty() {
                    format!("nothing to publish in {}", project.name)
                } else {
                    out.trim_end().to_string()
                }
            }
            Command::Help => HELP.to_string(),
            Command::Quit => String::new(),
        };
        Ok(output)
    }
}
