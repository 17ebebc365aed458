//! Trusted-cwd resolution and the three pre-spawn guards from spec §4.6:
//! directory-mismatch, path-scope, and inline-script.

use std::path::{Path, PathBuf};

use relaycore_domain::mentions::get_env_value_from_text;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("directory `{0}` is outside the trusted working directory")]
    DirectoryMismatch(String),
    #[error("argument `{0}` resolves outside the trusted working directory")]
    PathScopeViolation(String),
    #[error("command embeds an inline script, which could smuggle an out-of-scope path: {0}")]
    InlineScriptBlocked(String),
}

/// Where the trusted working directory comes from (spec §4.6, priority
/// order): an explicit per-call override, then the world's `variables`
/// block, then a process-wide default. Never the LLM's tool arguments.
#[derive(Debug, Clone)]
pub struct TrustContext {
    pub explicit_working_directory: Option<String>,
    pub world_variables_block: Option<String>,
    pub process_default: String,
}

impl TrustContext {
    pub fn resolve_trusted_cwd(&self) -> String {
        if let Some(dir) = &self.explicit_working_directory {
            return dir.clone();
        }
        if let Some(block) = &self.world_variables_block {
            if let Some(value) = get_env_value_from_text(block, "working_directory") {
                return value;
            }
        }
        self.process_default.clone()
    }
}

fn canonicalize(path: &Path) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(path)
}

fn contains(trusted: &Path, candidate: &Path) -> bool {
    candidate.starts_with(trusted)
}

/// Guard 1: if the LLM-supplied arguments name an explicit `directory`,
/// it must canonicalize to somewhere inside the trusted cwd. Returns
/// the resolved execution directory (the override if valid, otherwise
/// the trusted cwd itself).
pub fn enforce_directory(trusted_cwd: &str, requested_directory: Option<&str>) -> Result<PathBuf, GuardError> {
    let trusted_canonical = canonicalize(Path::new(trusted_cwd)).map_err(|_| GuardError::DirectoryMismatch(trusted_cwd.to_string()))?;

    match requested_directory {
        None => Ok(trusted_canonical),
        Some(dir) => {
            let candidate = canonicalize(Path::new(dir)).map_err(|_| GuardError::DirectoryMismatch(dir.to_string()))?;
            if contains(&trusted_canonical, &candidate) {
                Ok(candidate)
            } else {
                Err(GuardError::DirectoryMismatch(dir.to_string()))
            }
        }
    }
}

fn expand_tilde(token: &str) -> Option<PathBuf> {
    if token == "~" {
        return std::env::var("HOME").ok().map(PathBuf::from);
    }
    token.strip_prefix("~/").and_then(|rest| std::env::var("HOME").ok().map(|home| Path::new(&home).join(rest)))
}

/// Whether a token looks like a filesystem path reference: absolute,
/// `~`-prefixed, explicitly relative (`./`, `../`), slash-containing,
/// or the right-hand side of a `-flag=/path` style argument.
fn path_like_candidate(token: &str) -> Option<&str> {
    if let Some((_, rhs)) = token.split_once('=') {
        if rhs.starts_with('/') || rhs.starts_with('~') || rhs.starts_with("./") || rhs.starts_with("../") {
            return Some(rhs);
        }
    }
    if token.starts_with('/') || token.starts_with('~') || token.starts_with("./") || token.starts_with("../") || token.contains('/') {
        return Some(token);
    }
    None
}

/// Guard 2: every path-shaped token in the command or its parameters
/// must canonicalize inside the trusted cwd.
pub fn enforce_path_scope(trusted_cwd: &Path, tokens: &[String]) -> Result<(), GuardError> {
    for token in tokens {
        let Some(candidate_str) = path_like_candidate(token) else {
            continue;
        };

        let candidate_path = if let Some(expanded) = expand_tilde(candidate_str) {
            expanded
        } else if Path::new(candidate_str).is_absolute() {
            PathBuf::from(candidate_str)
        } else {
            trusted_cwd.join(candidate_str)
        };

        let canonical = canonicalize(&candidate_path).map_err(|_| GuardError::PathScopeViolation(token.clone()))?;
        if !contains(trusted_cwd, &canonical) {
            return Err(GuardError::PathScopeViolation(token.clone()));
        }
    }
    Ok(())
}

const SCRIPTING_INTERPRETERS: &[&str] = &["sh", "bash", "zsh", "ksh", "dash", "node", "python", "python3", "ruby", "perl", "pwsh", "powershell"];
const INLINE_SCRIPT_FLAGS: &[&str] = &["-c", "-e", "-command", "--command"];

/// Guard 3: reject interpreter invocations that embed a script inline
/// (`sh -c '...'`, `node -e '...'`, `pwsh -Command '...'`), including
/// through an `env` wrapper, since a path hidden inside the embedded
/// script text would otherwise bypass guard 2 entirely.
pub fn enforce_no_inline_script(tokens: &[String]) -> Result<(), GuardError> {
    let mut scan = tokens;
    if scan.first().map(String::as_str) == Some("env") {
        scan = &scan[1.min(scan.len())..];
    }

    let Some(interpreter) = scan.first() else {
        return Ok(());
    };
    let interpreter_name = Path::new(interpreter).file_name().and_then(|n| n.to_str()).unwrap_or(interpreter.as_str());
    if !SCRIPTING_INTERPRETERS.contains(&interpreter_name) {
        return Ok(());
    }

    for flag in &scan[1..] {
        if INLINE_SCRIPT_FLAGS.contains(&flag.to_ascii_lowercase().as_str()) {
            return Err(GuardError::InlineScriptBlocked(tokens.join(" ")));
        }
    }
    Ok(())
}

/// Quotes a parameter for inclusion in a shell command line if it
/// contains whitespace or quote characters.
pub fn quote_if_needed(param: &str) -> String {
    if param.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        format!("'{}'", param.replace('\'', "'\\''"))
    } else {
        param.to_string()
    }
}

/// Naive whitespace tokenizer used for guard scanning. Not a full
/// shell-word parser — good enough to spot interpreter flags and
/// path-shaped arguments before anything is spawned.
pub fn tokenize(command: &str, parameters: &[String]) -> Vec<String> {
    let mut tokens: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    tokens.extend(parameters.iter().cloned());
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolves_explicit_override_first() {
        let ctx = TrustContext {
            explicit_working_directory: Some("/explicit".into()),
            world_variables_block: Some("working_directory=/variables".into()),
            process_default: "/default".into(),
        };
        assert_eq!(ctx.resolve_trusted_cwd(), "/explicit");
    }

    #[test]
    fn falls_back_to_variables_block_then_default() {
        let ctx = TrustContext {
            explicit_working_directory: None,
            world_variables_block: Some("working_directory=/variables".into()),
            process_default: "/default".into(),
        };
        assert_eq!(ctx.resolve_trusted_cwd(), "/variables");

        let ctx2 = TrustContext {
            explicit_working_directory: None,
            world_variables_block: None,
            process_default: "/default".into(),
        };
        assert_eq!(ctx2.resolve_trusted_cwd(), "/default");
    }

    #[test]
    fn directory_guard_accepts_subdirectory() {
        let root = tempdir().unwrap();
        let sub = root.path().join("work");
        std::fs::create_dir(&sub).unwrap();
        let resolved = enforce_directory(root.path().to_str().unwrap(), Some(sub.to_str().unwrap())).unwrap();
        assert_eq!(resolved, sub.canonicalize().unwrap());
    }

    #[test]
    fn directory_guard_rejects_outside_directory() {
        let root = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let err = enforce_directory(root.path().to_str().unwrap(), Some(outside.path().to_str().unwrap())).unwrap_err();
        assert!(matches!(err, GuardError::DirectoryMismatch(_)));
    }

    #[test]
    fn directory_guard_defaults_to_trusted_cwd_when_absent() {
        let root = tempdir().unwrap();
        let resolved = enforce_directory(root.path().to_str().unwrap(), None).unwrap();
        assert_eq!(resolved, root.path().canonicalize().unwrap());
    }

    #[test]
    fn path_scope_accepts_file_inside_trusted_cwd() {
        let root = tempdir().unwrap();
        let file = root.path().join("note.txt");
        std::fs::write(&file, "hi").unwrap();
        let trusted = root.path().canonicalize().unwrap();
        let tokens = tokenize("cat", &[file.to_str().unwrap().to_string()]);
        enforce_path_scope(&trusted, &tokens).unwrap();
    }

    #[test]
    fn path_scope_rejects_file_outside_trusted_cwd() {
        let root = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let file = outside.path().join("secret.txt");
        std::fs::write(&file, "shh").unwrap();
        let trusted = root.path().canonicalize().unwrap();
        let tokens = tokenize("cat", &[file.to_str().unwrap().to_string()]);
        let err = enforce_path_scope(&trusted, &tokens).unwrap_err();
        assert!(matches!(err, GuardError::PathScopeViolation(_)));
    }

    #[test]
    fn path_scope_ignores_non_path_tokens() {
        let root = tempdir().unwrap();
        let trusted = root.path().canonicalize().unwrap();
        let tokens = tokenize("echo", &["hello".into(), "--flag".into()]);
        enforce_path_scope(&trusted, &tokens).unwrap();
    }

    #[test]
    fn inline_script_guard_blocks_sh_dash_c() {
        let tokens = tokenize("sh", &["-c".into(), "rm -rf /tmp".into()]);
        let err = enforce_no_inline_script(&tokens).unwrap_err();
        assert!(matches!(err, GuardError::InlineScriptBlocked(_)));
    }

    #[test]
    fn inline_script_guard_blocks_through_env_wrapper() {
        let tokens = tokenize("env", &["python3".into(), "-c".into(), "import os".into()]);
        enforce_no_inline_script(&tokens).unwrap_err();
    }

    #[test]
    fn inline_script_guard_allows_plain_script_invocation() {
        let tokens = tokenize("python3", &["script.py".into()]);
        enforce_no_inline_script(&tokens).unwrap();
    }

    #[test]
    fn inline_script_guard_ignores_non_interpreter_commands() {
        let tokens = tokenize("ls", &["-la".into()]);
        enforce_no_inline_script(&tokens).unwrap();
    }

    #[test]
    fn quote_if_needed_wraps_whitespace() {
        assert_eq!(quote_if_needed("hello world"), "'hello world'");
        assert_eq!(quote_if_needed("plain"), "plain");
    }
}
