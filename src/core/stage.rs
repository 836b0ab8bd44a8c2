//! Static classification of steps into pipeline stages
//!
//! A `run:` body is treated as opaque shell text when executed. For
//! inspection (plan output and audits) each line is split into words and
//! recognised as one of the stages a Python package pipeline goes through:
//! environment setup, dependency installation, strict and lenient lint
//! passes, and test execution. Lint and test invocations additionally have
//! their selection and exclusion options parsed.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Stage a command belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Checkout,
    Setup,
    Install,
    StrictLint,
    LenientLint,
    Test,
    Other,
}

impl StageKind {
    /// Position in the canonical order setup → install → strict-lint →
    /// lenient-lint → test; `None` for stages that may appear anywhere
    pub fn rank(&self) -> Option<u8> {
        match self {
            StageKind::Setup => Some(0),
            StageKind::Install => Some(1),
            StageKind::StrictLint => Some(2),
            StageKind::LenientLint => Some(3),
            StageKind::Test => Some(4),
            StageKind::Checkout | StageKind::Other => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Checkout => "checkout",
            StageKind::Setup => "setup",
            StageKind::Install => "install",
            StageKind::StrictLint => "strict-lint",
            StageKind::LenientLint => "lenient-lint",
            StageKind::Test => "test",
            StageKind::Other => "other",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// flake8 checks enabled when `--select` is not given
const DEFAULT_LINT_SELECT: &[&str] = &["E", "F", "W", "C90"];

/// Packages whose installation is part of the lint or test stage that uses them
const TOOL_PACKAGES: &[&str] = &["flake8", "pytest", "pytest-cov", "pytest-xdist"];

/// Options of one flake8 invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintSettings {
    pub select: Vec<String>,
    pub ignore: Vec<String>,
    pub exclude: Vec<String>,
    pub exit_zero: bool,
    pub max_complexity: Option<u32>,
    pub max_line_length: Option<u32>,
    pub paths: Vec<String>,
}

impl LintSettings {
    /// Parse flake8 arguments (program name excluded)
    pub fn parse(args: &[String]) -> Self {
        let mut settings = LintSettings::default();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            let Some(option) = arg.strip_prefix("--") else {
                if !arg.starts_with('-') {
                    settings.paths.push(arg.clone());
                }
                continue;
            };

            let (name, inline) = match option.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (option, None),
            };

            let takes_value = matches!(
                name,
                "select"
                    | "extend-select"
                    | "ignore"
                    | "extend-ignore"
                    | "exclude"
                    | "extend-exclude"
                    | "max-complexity"
                    | "max-line-length"
            );
            let value = if takes_value {
                inline.or_else(|| iter.next().cloned())
            } else {
                inline
            };

            match (name, value) {
                ("exit-zero", _) => settings.exit_zero = true,
                ("select" | "extend-select", Some(v)) => settings.select.extend(split_list(&v)),
                ("ignore" | "extend-ignore", Some(v)) => settings.ignore.extend(split_list(&v)),
                ("exclude" | "extend-exclude", Some(v)) => settings.exclude.extend(split_list(&v)),
                ("max-complexity", Some(v)) => settings.max_complexity = v.parse().ok(),
                ("max-line-length", Some(v)) => settings.max_line_length = v.parse().ok(),
                _ => {}
            }
        }

        if settings.paths.is_empty() {
            settings.paths.push(".".to_string());
        }
        settings
    }

    /// Check whether a reported code is enabled for this pass
    ///
    /// The longest matching prefix wins between `--select` and `--ignore`,
    /// so `--select=F63 --ignore=F632` keeps `F631` and drops `F632`.
    pub fn is_selected(&self, code: &str) -> bool {
        let select_len = if self.select.is_empty() {
            longest_prefix(DEFAULT_LINT_SELECT.iter().copied(), code)
        } else {
            longest_prefix(self.select.iter().map(String::as_str), code)
        };
        let ignore_len = longest_prefix(self.ignore.iter().map(String::as_str), code);

        match (select_len, ignore_len) {
            (Some(s), Some(i)) => s > i,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Check whether a file lies inside an excluded path
    ///
    /// Like flake8, a pattern matches a path prefix, the whole path, or
    /// the name of any of its components, with `*`/`?`/`[...]` globs.
    pub fn is_excluded(&self, path: &str) -> bool {
        let path = normalize_path(path);
        if self
            .exclude
            .iter()
            .any(|pattern| path_is_within(&path, &normalize_path(pattern)))
        {
            return true;
        }

        let Some(globs) = exclude_globs(&self.exclude) else {
            return false;
        };
        globs.is_match(&path) || path.split('/').any(|component| globs.is_match(component))
    }

    /// Check whether a defect `code` in `path` fails this lint pass
    pub fn fails_on(&self, code: &str, path: &str) -> bool {
        !self.exit_zero && self.is_selected(code) && !self.is_excluded(path)
    }

    /// A pass configured with thresholds reports metrics rather than defects
    pub fn reports_metrics(&self) -> bool {
        self.max_complexity.is_some() || self.max_line_length.is_some()
    }
}

/// Options of one pytest invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSettings {
    pub ignore: Vec<String>,
    pub paths: Vec<String>,
}

impl TestSettings {
    /// Parse pytest arguments (program name excluded)
    pub fn parse(args: &[String]) -> Self {
        let mut settings = TestSettings::default();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            if let Some(path) = arg.strip_prefix("--ignore=") {
                settings.ignore.push(path.to_string());
            } else if arg == "--ignore" {
                if let Some(path) = iter.next() {
                    settings.ignore.push(path.clone());
                }
            } else if !arg.starts_with('-') {
                settings.paths.push(arg.clone());
            }
        }

        settings
    }

    /// Check whether a test file would be collected
    pub fn collects(&self, path: &str) -> bool {
        let path = normalize_path(path);
        !self
            .ignore
            .iter()
            .any(|ignored| path_is_within(&path, &normalize_path(ignored)))
    }
}

/// One recognised shell command of a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedCommand {
    pub line: String,
    pub kind: StageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lint: Option<LintSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<TestSettings>,
}

/// Classify an action reference such as `actions/setup-python@v2`
pub fn classify_action(uses: &str) -> StageKind {
    let name = uses.split('@').next().unwrap_or(uses);
    let last = name.rsplit('/').next().unwrap_or(name);
    if last == "checkout" {
        StageKind::Checkout
    } else if last.starts_with("setup-") {
        StageKind::Setup
    } else {
        StageKind::Other
    }
}

/// Classify every command of a `run:` body
pub fn classify_script(script: &str) -> Vec<ClassifiedCommand> {
    let mut commands = Vec::new();
    let mut tool_installs = Vec::new();

    for line in script.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let words = match shell_words::split(line) {
            Ok(words) => words,
            Err(e) => {
                debug!("Falling back to whitespace split for '{}': {}", line, e);
                line.split_whitespace().map(str::to_string).collect()
            }
        };

        for segment in words.split(|w| w == "&&" || w == "||" || w == ";") {
            if segment.is_empty() {
                continue;
            }
            let (command, tool_install) = classify_words(line, segment);
            if tool_install {
                tool_installs.push(commands.len());
            }
            commands.push(command);
        }
    }

    // Installing a linter or test runner belongs to the stage that runs it
    for index in tool_installs {
        let next = commands[index + 1..]
            .iter()
            .map(|c| c.kind)
            .find(|k| matches!(k, StageKind::StrictLint | StageKind::LenientLint | StageKind::Test));
        if let Some(kind) = next {
            commands[index].kind = kind;
        }
    }

    commands
}

/// Returns the command and whether it only installs tooling
fn classify_words(line: &str, words: &[String]) -> (ClassifiedCommand, bool) {
    let words: Vec<String> = words
        .iter()
        .skip_while(|w| is_env_assignment(w))
        .cloned()
        .collect();

    let mut command = ClassifiedCommand {
        line: line.to_string(),
        kind: StageKind::Other,
        lint: None,
        test: None,
    };

    let Some(program) = words.first() else {
        return (command, false);
    };
    let program = program.rsplit('/').next().unwrap_or(program);

    let (tool, args) = if program.starts_with("python") && words.get(1).map(String::as_str) == Some("-m") {
        match words.get(2) {
            Some(module) => (module.as_str(), &words[3..]),
            None => return (command, false),
        }
    } else {
        (program, &words[1..])
    };

    let mut tool_install = false;
    match tool {
        "pip" | "pip3" if args.first().map(String::as_str) == Some("install") => {
            command.kind = StageKind::Install;
            tool_install = installs_only_tools(&args[1..]);
        }
        "flake8" => {
            let settings = LintSettings::parse(args);
            command.kind = if settings.exit_zero {
                StageKind::LenientLint
            } else {
                StageKind::StrictLint
            };
            command.lint = Some(settings);
        }
        "pytest" | "py.test" => {
            command.kind = StageKind::Test;
            command.test = Some(TestSettings::parse(args));
        }
        _ => {}
    }

    (command, tool_install)
}

fn installs_only_tools(args: &[String]) -> bool {
    let mut packages = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-r" | "--requirement" | "-c" | "--constraint" | "-e" | "--editable" => return false,
            "-f" | "--find-links" | "-i" | "--index-url" | "--extra-index-url" => {
                iter.next();
            }
            a if a.starts_with('-') => {}
            package => packages.push(package),
        }
    }

    !packages.is_empty()
        && packages.iter().all(|p| {
            let name = p
                .split(|c| matches!(c, '=' | '<' | '>' | '!' | '~' | '['))
                .next()
                .unwrap_or(p);
            TOOL_PACKAGES.contains(&name)
        })
}

fn is_env_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn longest_prefix<'a>(prefixes: impl Iterator<Item = &'a str>, code: &str) -> Option<usize> {
    prefixes
        .filter(|p| code.starts_with(p))
        .map(str::len)
        .max()
}

/// Compile exclusion patterns; invalid ones are logged and ignored
pub fn exclude_globs(patterns: &[String]) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match GlobBuilder::new(&normalize_path(pattern))
            .literal_separator(true)
            .build()
        {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => debug!("Ignoring exclusion pattern '{}': {}", pattern, e),
        }
    }
    builder.build().ok()
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    let path = path.strip_prefix("./").unwrap_or(path);
    path.trim_end_matches('/').to_string()
}

fn path_is_within(path: &str, root: &str) -> bool {
    root == "." || path == root || path.starts_with(&format!("{}/", root))
}
