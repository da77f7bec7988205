//! Command specifications and the flag-aware command builder

use std::collections::{BTreeMap, HashMap};
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::Arc;

/// Default prefix for flags longer than one character
pub const LONG_FLAG_PREFIX: &str = "--";

/// Default prefix for single-character flags
pub const SHORT_FLAG_PREFIX: &str = "-";

/// Process attributes applied in the child before exec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessAttrs {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// Everything needed to start a process, already resolved.
///
/// A respawned task receives a clone of this value. Extra files are shared
/// handles; they are mapped onto descriptors 3, 4, ... in the child.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Start from the parent's environment (true) or an empty one (false)
    pub inherit_env: bool,
    pub cwd: Option<PathBuf>,
    pub extra_files: Vec<Arc<OwnedFd>>,
    pub attrs: ProcessAttrs,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            inherit_env: true,
            cwd: None,
            extra_files: Vec::new(),
            attrs: ProcessAttrs::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn extra_file(mut self, fd: OwnedFd) -> Self {
        self.extra_files.push(Arc::new(fd));
        self
    }

    pub fn attrs(mut self, attrs: ProcessAttrs) -> Self {
        self.attrs = attrs;
        self
    }

    /// Program path as shown in logs
    pub fn display_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

/// Value of a single flag in a [`CommandBuilder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    /// `true` adds the bare flag, `false` omits it
    Bool(bool),
    Str(String),
    Int(i64),
    /// Repeats the flag once per value
    List(Vec<String>),
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Vec<String>> for FlagValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// Factory for argument vectors of the form `PROGRAM [SUB...] FLAGS [SEP] ARGS`.
///
/// Flags are emitted in name order.
///
/// ```
/// use warden_task::CommandBuilder;
///
/// let argv = CommandBuilder::new("git")
///     .subcommand("log")
///     .flag("oneline", true)
///     .flag("n", 5_i64)
///     .argv();
/// assert_eq!(argv, ["git", "log", "-n", "5", "--oneline"]);
/// ```
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    first: Vec<String>,
    flags: BTreeMap<String, FlagValue>,
    args: Vec<String>,
    long_prefix: String,
    short_prefix: String,
    separator: Option<String>,
}

impl CommandBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            first: vec![program.into()],
            flags: BTreeMap::new(),
            args: Vec::new(),
            long_prefix: LONG_FLAG_PREFIX.to_string(),
            short_prefix: SHORT_FLAG_PREFIX.to_string(),
            separator: None,
        }
    }

    /// Append a word to the command prefix (before any flag)
    pub fn subcommand(mut self, word: impl Into<String>) -> Self {
        self.first.push(word.into());
        self
    }

    pub fn flag(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.flags.insert(name.into(), value.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn long_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.long_prefix = prefix.into();
        self
    }

    pub fn short_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.short_prefix = prefix.into();
        self
    }

    /// Separator placed between the last flag and the first argument
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    /// The full argument vector, program first
    pub fn argv(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.first.len() + self.flags.len() * 2 + self.args.len() + 1);
        out.extend(self.first.iter().cloned());

        for (name, value) in &self.flags {
            let prefix = if name.chars().count() == 1 {
                &self.short_prefix
            } else {
                &self.long_prefix
            };
            let flag = format!("{}{}", prefix, name);

            match value {
                FlagValue::Bool(true) => out.push(flag),
                FlagValue::Bool(false) => {}
                FlagValue::Str(s) => {
                    out.push(flag);
                    out.push(s.clone());
                }
                FlagValue::Int(n) => {
                    out.push(flag);
                    out.push(n.to_string());
                }
                FlagValue::List(values) => {
                    for v in values {
                        out.push(flag.clone());
                        out.push(v.clone());
                    }
                }
            }
        }

        if let Some(separator) = &self.separator {
            out.push(separator.clone());
        }

        out.extend(self.args.iter().cloned());
        out
    }

    /// Build a fresh [`CommandSpec`]; the builder can be reused as a factory
    pub fn build(&self) -> CommandSpec {
        let mut argv = self.argv().into_iter();
        // `first` always holds the program
        let program = argv.next().unwrap_or_default();
        CommandSpec::new(program).args(argv)
    }

    /// Prefix `inner` with this command, for multi-level commands such as
    /// `ssh host -- rsync ...`
    pub fn join(&self, mut inner: CommandBuilder) -> CommandBuilder {
        let mut first = self.argv();
        first.append(&mut inner.first);
        inner.first = first;
        inner
    }
}
