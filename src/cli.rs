//! Command-line interface for shell-keeper.
//!
//! Uses lexopt for minimal binary size overhead. Global options go before
//! the subcommand; `-h/--help` is accepted anywhere.

use std::ffi::OsString;
use std::path::PathBuf;

use lexopt::prelude::*;

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalArgs {
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parsed command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cli {
    pub global: GlobalArgs,
    /// `None` when `sk` runs without a subcommand.
    pub command: Option<Command>,
}

/// Arguments of `sk new`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewArgs {
    pub name: Option<String>,
    /// Profile name or UUID.
    pub profile: Option<String>,
    /// Inherit the profile of the session this command runs in.
    pub match_current: bool,
    pub template: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub command: Option<String>,
}

/// What `sk kill` targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillTarget {
    Name(String),
    Pattern(String),
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilesCommand {
    List,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataCommand {
    List,
    Clean,
    /// Write the snapshot to a file, or stdout.
    Export { output: Option<PathBuf> },
    Import { input: PathBuf, force: bool },
}

/// A subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New(NewArgs),
    Attach { name: String },
    List,
    Kill(KillTarget),
    Rename { old: String, new: String },
    Clean,
    Last,
    Info { name: Option<String> },
    Note { name: String, text: Option<String> },
    Cleanup { days: i64 },
    Restore { name: Option<String> },
    RestoreAll,
    Terminal { profile: Option<String>, match_current: bool },
    Profiles(ProfilesCommand),
    Metadata(MetadataCommand),
    SetupAutostart,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Cli, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Cli, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    let mut cli = Cli::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                cli.global.help = true;
            }
            Short('V') | Long("version") => {
                cli.global.version = true;
            }
            Short('c') | Long("config") => {
                cli.global.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                cli.global.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                let name: String = val.parse()?;
                match parse_command(&name, &mut parser, &mut cli.global) {
                    Ok(command) => cli.command = Some(command),
                    // `sk <cmd> --help` only needs the help text.
                    Err(_) if cli.global.help => {}
                    Err(e) => return Err(e),
                }
                break;
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(cli)
}

fn parse_command(
    name: &str,
    parser: &mut lexopt::Parser,
    global: &mut GlobalArgs,
) -> Result<Command, ArgsError> {
    match name {
        "new" | "create" => parse_new(parser, global).map(Command::New),
        "attach" | "a" => {
            let name = single_value(parser, global, "name")?;
            Ok(Command::Attach { name })
        }
        "list" | "ls" => no_args(parser, global).map(|_| Command::List),
        "kill" => parse_kill(parser, global).map(Command::Kill),
        "rename" => {
            let mut values = values(parser, global)?.into_iter();
            match (values.next(), values.next(), values.next()) {
                (Some(old), Some(new), None) => Ok(Command::Rename { old, new }),
                (_, _, Some(extra)) => Err(ArgsError::UnexpectedArgument(extra)),
                (None, _, _) => Err(ArgsError::MissingArgument("old name")),
                (Some(_), None, _) => Err(ArgsError::MissingArgument("new name")),
            }
        }
        "clean" => no_args(parser, global).map(|_| Command::Clean),
        "last" => no_args(parser, global).map(|_| Command::Last),
        "info" => {
            let name = optional_value(parser, global)?;
            Ok(Command::Info { name })
        }
        "note" => {
            let mut values = values(parser, global)?.into_iter();
            let name = values.next().ok_or(ArgsError::MissingArgument("name"))?;
            let rest: Vec<String> = values.collect();
            let text = (!rest.is_empty()).then(|| rest.join(" "));
            Ok(Command::Note { name, text })
        }
        "cleanup" => {
            let raw = single_value(parser, global, "days")?;
            let days = raw
                .parse()
                .map_err(|_| ArgsError::InvalidValue("days", raw))?;
            Ok(Command::Cleanup { days })
        }
        "restore" => {
            let name = optional_value(parser, global)?;
            Ok(Command::Restore { name })
        }
        "restore-all" => no_args(parser, global).map(|_| Command::RestoreAll),
        "terminal" | "term" => {
            let new = parse_new(parser, global)?;
            if let Some(name) = new.name {
                return Err(ArgsError::UnexpectedArgument(name));
            }
            Ok(Command::Terminal {
                profile: new.profile,
                match_current: new.match_current,
            })
        }
        "profiles" => {
            let sub = optional_value(parser, global)?;
            match sub.as_deref() {
                Some("list") | None => Ok(Command::Profiles(ProfilesCommand::List)),
                Some("default") => Ok(Command::Profiles(ProfilesCommand::Default)),
                Some(other) => Err(ArgsError::UnknownCommand(format!("profiles {other}"))),
            }
        }
        "metadata" => parse_metadata(parser, global).map(Command::Metadata),
        "setup-autostart" => no_args(parser, global).map(|_| Command::SetupAutostart),
        other => Err(ArgsError::UnknownCommand(other.to_string())),
    }
}

fn parse_new(parser: &mut lexopt::Parser, global: &mut GlobalArgs) -> Result<NewArgs, ArgsError> {
    let mut result = NewArgs::default();

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => global.help = true,
            Short('p') | Long("profile") => {
                result.profile = Some(parser.value()?.parse()?);
            }
            Short('m') | Long("match") => result.match_current = true,
            Short('t') | Long("template") => {
                result.template = Some(parser.value()?.parse()?);
            }
            Short('d') | Long("dir") => {
                result.working_dir = Some(parser.value()?.parse()?);
            }
            Short('x') | Long("command") => {
                result.command = Some(parser.value()?.parse()?);
            }
            Value(val) if result.name.is_none() => {
                result.name = Some(val.parse()?);
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

fn parse_kill(parser: &mut lexopt::Parser, global: &mut GlobalArgs) -> Result<KillTarget, ArgsError> {
    let mut targets = Vec::new();

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => global.help = true,
            Short('a') | Long("all") => targets.push(KillTarget::All),
            Short('p') | Long("pattern") => {
                targets.push(KillTarget::Pattern(parser.value()?.parse()?));
            }
            Value(val) => targets.push(KillTarget::Name(val.parse()?)),
            _ => return Err(arg.unexpected().into()),
        }
    }

    let mut targets = targets.into_iter();
    match (targets.next(), targets.next()) {
        (Some(target), None) => Ok(target),
        (None, _) => Err(ArgsError::MissingArgument("name, --all or --pattern")),
        (Some(_), Some(_)) => Err(ArgsError::Conflict(
            "kill takes exactly one of <name>, --all, --pattern",
        )),
    }
}

fn parse_metadata(
    parser: &mut lexopt::Parser,
    global: &mut GlobalArgs,
) -> Result<MetadataCommand, ArgsError> {
    let mut sub: Option<String> = None;
    let mut force = false;
    let mut operands = Vec::new();

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => global.help = true,
            Short('f') | Long("force") => force = true,
            Value(val) if sub.is_none() => sub = Some(val.parse()?),
            Value(val) => operands.push(PathBuf::from(val)),
            _ => return Err(arg.unexpected().into()),
        }
    }

    let mut operands = operands.into_iter();
    let command = match sub.as_deref() {
        Some("list") | None => MetadataCommand::List,
        Some("clean") => MetadataCommand::Clean,
        Some("export") => MetadataCommand::Export {
            output: operands.next(),
        },
        Some("import") => MetadataCommand::Import {
            input: operands.next().ok_or(ArgsError::MissingArgument("file"))?,
            force,
        },
        Some(other) => return Err(ArgsError::UnknownCommand(format!("metadata {other}"))),
    };

    if let Some(extra) = operands.next() {
        return Err(ArgsError::UnexpectedArgument(
            extra.to_string_lossy().into_owned(),
        ));
    }

    Ok(command)
}

/// Collect the remaining positional values.
fn values(parser: &mut lexopt::Parser, global: &mut GlobalArgs) -> Result<Vec<String>, ArgsError> {
    let mut values = Vec::new();
    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => global.help = true,
            Value(val) => values.push(val.parse()?),
            _ => return Err(arg.unexpected().into()),
        }
    }
    Ok(values)
}

fn optional_value(
    parser: &mut lexopt::Parser,
    global: &mut GlobalArgs,
) -> Result<Option<String>, ArgsError> {
    let mut values = values(parser, global)?.into_iter();
    let first = values.next();
    match values.next() {
        Some(extra) => Err(ArgsError::UnexpectedArgument(extra)),
        None => Ok(first),
    }
}

fn single_value(
    parser: &mut lexopt::Parser,
    global: &mut GlobalArgs,
    what: &'static str,
) -> Result<String, ArgsError> {
    match optional_value(parser, global)? {
        Some(value) => Ok(value),
        None => Err(ArgsError::MissingArgument(what)),
    }
}

fn no_args(parser: &mut lexopt::Parser, global: &mut GlobalArgs) -> Result<(), ArgsError> {
    optional_value(parser, global)?
        .map_or(Ok(()), |extra| Err(ArgsError::UnexpectedArgument(extra)))
}

/// Help text shown by `--help` and by a bare `sk` with no sessions.
pub fn help_text() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!(
        r#"sk {version}
Named, detachable terminal sessions on top of dtach

USAGE:
    sk [OPTIONS] [COMMAND]

COMMANDS:
    new [NAME]              Create a session (auto-named if NAME is omitted)
        -p, --profile <P>   Terminal profile name or UUID
        -m, --match         Use the current session's profile
        -t, --template <T>  Apply a configured template
        -d, --dir <DIR>     Start the shell in DIR
        -x, --command <CMD> Run CMD before the interactive shell
    attach <NAME>           Attach to a session (alias: a)
    list                    List live sessions (alias: ls)
    kill <NAME>             Kill a session
    kill --all              Kill every session
    kill --pattern <GLOB>   Kill sessions whose name matches GLOB
    rename <OLD> <NEW>      Rename a session
    clean                   Remove dead sockets and orphaned metadata
    last                    Attach to the most recent session
    info [NAME]             Show session details (current session if omitted)
    note <NAME> [TEXT]      Set a note, or clear it when TEXT is omitted
    cleanup <DAYS>          Kill sessions not attached for more than DAYS days
    restore [NAME]          Reopen a session in a new terminal window
    restore-all             Reopen every live session
    terminal                Open a new terminal window with a new session
    profiles [list|default] Show terminal profiles
    metadata list           Show stored metadata
    metadata clean          Drop metadata of sessions without a socket
    metadata export [FILE]  Write a metadata snapshot (stdout if omitted)
    metadata import <FILE>  Merge a snapshot [-f, --force to overwrite]
    setup-autostart         Restore sessions on desktop login

OPTIONS:
    -c, --config <FILE>     Path to configuration file (JSON)
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    SHELLKEEPER_HOME        Storage root [default: ~/.shellkeeper]
    SHELLKEEPER_SESSION     Set inside sessions; used by --match and info
    SK_SOCKET_DIR           Socket directory (overrides config)
    SK_LOG_LEVEL            Log level (overrides config)
    SK_DEBUG                Enable debug logging

INSIDE A SESSION:
    Ctrl+\                  Detach (the session keeps running)
    Ctrl+C                  Goes to the shell; it does not detach
    exit                    Terminate the session
"#
    )
}

/// Print help message.
pub fn print_help() {
    print!("{}", help_text());
}

/// Print version.
pub fn print_version() {
    println!("sk {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Unexpected positional argument.
    UnexpectedArgument(String),
    /// Unknown subcommand.
    UnknownCommand(String),
    /// A required positional argument is missing.
    MissingArgument(&'static str),
    /// Mutually exclusive arguments were combined.
    Conflict(&'static str),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for {}: '{}'", name, value)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
            Self::UnknownCommand(cmd) => write!(f, "unknown command: '{}'", cmd),
            Self::MissingArgument(what) => write!(f, "missing argument: {}", what),
            Self::Conflict(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
