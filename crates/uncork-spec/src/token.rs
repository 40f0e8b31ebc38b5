//! Reversible rewriting of user-specific absolute paths into portable tokens.
//!
//! Registry hives and text configuration inside a captured prefix embed the
//! build user's identity in two shapes: the Windows form (`C:\users\<name>`,
//! with doubled backslashes inside `.reg` value strings) and the Unix form
//! (`/home/<name>`). Capture rewrites both into placeholder tokens; the
//! generated launchers perform the exact inverse at first run with the real
//! invoking user's identity.
//!
//! Tokens are first-class values with explicit resolvers, not ad hoc string
//! replacement: the [`TokenMap`] records every binding and rejects two
//! distinct originals collapsing into one token. Hex-encoded registry values
//! are never rewritten in place; an embedded path there is reported as a
//! warning, because editing binary fields without their length semantics
//! would corrupt the hive.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Placeholder for the capture user's name inside Windows-form paths.
pub const USER_TOKEN: &str = "__WINE_USER__";
/// Placeholder for the capture user's full Unix home directory.
pub const HOME_TOKEN: &str = "__USER_HOME__";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token {token} already bound to '{existing}', cannot also stand for '{value}'")]
    Collision {
        token: Token,
        existing: String,
        value: String,
    },
    #[error("invalid capture user name '{0}'")]
    InvalidUser(String),
}

/// The closed set of placeholders a capture may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Token {
    /// The capture user's login name (Windows path component).
    WineUser,
    /// The capture user's Unix home directory (full path).
    UserHome,
}

impl Token {
    pub fn placeholder(self) -> &'static str {
        match self {
            Self::WineUser => USER_TOKEN,
            Self::UserHome => HOME_TOKEN,
        }
    }

    /// The concrete value this token resolves to for a given real user.
    pub fn resolve(self, user: &RealUser) -> String {
        match self {
            Self::WineUser => user.name.clone(),
            Self::UserHome => user.home.to_string_lossy().into_owned(),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.placeholder())
    }
}

/// Identity of the real invoking user at resolution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealUser {
    pub name: String,
    pub home: PathBuf,
}

impl RealUser {
    pub fn new(name: impl Into<String>, home: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            home: home.into(),
        }
    }

    /// Identity of the current process owner, from `USER`/`HOME`.
    pub fn current() -> Option<Self> {
        let name = std::env::var("USER").ok()?;
        let home = std::env::var("HOME").ok()?;
        Some(Self::new(name, home))
    }
}

/// Record of the bindings produced by one capture.
///
/// Tokenization must be injective within a capture: each token stands for
/// exactly one original value. Re-binding the same value is fine (the same
/// path occurs many times); binding a *different* value is a hard error.
#[derive(Debug, Default)]
pub struct TokenMap {
    bindings: BTreeMap<Token, String>,
    /// Number of substitutions performed across all content.
    pub replacements: usize,
    /// Non-fatal findings, e.g. paths embedded in binary registry values.
    pub warnings: Vec<String>,
}

impl TokenMap {
    pub fn bind(&mut self, token: Token, value: &str) -> Result<(), TokenError> {
        match self.bindings.get(&token) {
            Some(existing) if existing != value => Err(TokenError::Collision {
                token,
                existing: existing.clone(),
                value: value.to_owned(),
            }),
            Some(_) => Ok(()),
            None => {
                self.bindings.insert(token, value.to_owned());
                Ok(())
            }
        }
    }

    pub fn binding(&self, token: Token) -> Option<&str> {
        self.bindings.get(&token).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Path tokenizer for one capture, configured with the source prefix's user.
pub struct Tokenizer {
    user: String,
    home: String,
    // Windows-form patterns, doubled-backslash variants first so the
    // single-backslash patterns never see already-escaped text.
    win_patterns: Vec<Regex>,
    unix_pattern: Regex,
}

impl Tokenizer {
    /// Create a tokenizer for a prefix owned by `original_user`.
    ///
    /// The user's Unix home defaults to `/home/<name>`; override with
    /// [`with_home`](Self::with_home) when the source prefix lived elsewhere.
    pub fn new(original_user: &str) -> Result<Self, TokenError> {
        if original_user.is_empty()
            || original_user.contains(['/', '\\', '\0'])
            || original_user == "."
            || original_user == ".."
        {
            return Err(TokenError::InvalidUser(original_user.to_owned()));
        }

        let escaped = regex::escape(original_user);
        let sources = [
            format!(r"(?i)(C:\\\\users\\\\){escaped}\b"),
            format!(r"(?i)(C:\\users\\){escaped}\b"),
            format!(r"(?i)(Z:\\\\home\\\\){escaped}\b"),
            format!(r"(?i)(Z:\\home\\){escaped}\b"),
        ];
        let win_patterns = sources
            .iter()
            .map(|s| Regex::new(s).expect("static pattern shape"))
            .collect();
        let unix_pattern =
            Regex::new(&format!(r"/home/{escaped}\b")).expect("static pattern shape");

        Ok(Self {
            user: original_user.to_owned(),
            home: format!("/home/{original_user}"),
            win_patterns,
            unix_pattern,
        })
    }

    pub fn with_home(mut self, home: impl Into<String>) -> Self {
        self.home = home.into();
        self
    }

    /// Rewrite registry content (`system.reg`, `user.reg`, `userdef.reg`).
    ///
    /// String values are rewritten via the path patterns. Hex-encoded values
    /// (`hex:` / `hex(N):`) are left byte-for-byte untouched; when their
    /// decoded content appears to embed the capture user's path, a warning
    /// naming the line is recorded instead.
    pub fn tokenize_registry(
        &self,
        content: &str,
        map: &mut TokenMap,
    ) -> Result<String, TokenError> {
        let mut out = String::with_capacity(content.len());
        for (lineno, line) in content.split_inclusive('\n').enumerate() {
            if is_hex_value_line(line) {
                if hex_line_embeds_user(line, &self.user) {
                    map.warnings.push(format!(
                        "binary registry value on line {} embeds path of user '{}'; left untouched",
                        lineno + 1,
                        self.user
                    ));
                }
                out.push_str(line);
            } else {
                out.push_str(&self.tokenize_line(line, map)?);
            }
        }
        Ok(out)
    }

    /// Rewrite plain-text configuration content (no hex-field handling).
    pub fn tokenize_text(&self, content: &str, map: &mut TokenMap) -> Result<String, TokenError> {
        self.tokenize_line(content, map)
    }

    fn tokenize_line(&self, line: &str, map: &mut TokenMap) -> Result<String, TokenError> {
        let mut current = line.to_owned();

        for pat in &self.win_patterns {
            let mut hits = 0;
            current = pat
                .replace_all(&current, |caps: &regex::Captures<'_>| {
                    hits += 1;
                    format!("{}{USER_TOKEN}", &caps[1])
                })
                .into_owned();
            if hits > 0 {
                map.bind(Token::WineUser, &self.user)?;
                map.replacements += hits;
            }
        }

        // Longest prefix wins: the full home path (which covers every path
        // underneath it) becomes the home token as one unit.
        let mut hits = 0;
        current = self
            .unix_pattern
            .replace_all(&current, |_: &regex::Captures<'_>| {
                hits += 1;
                HOME_TOKEN.to_owned()
            })
            .into_owned();
        if hits > 0 {
            map.bind(Token::UserHome, &self.home)?;
            map.replacements += hits;
        }

        Ok(current)
    }
}

/// Replace tokens with concrete values for the real invoking user.
///
/// The exact inverse of tokenization for the capture user, and a pure
/// substitution for any other user. Idempotent: resolved content contains no
/// tokens, so resolving again is a no-op.
pub fn resolve(content: &str, user: &RealUser) -> String {
    content
        .replace(HOME_TOKEN, &Token::UserHome.resolve(user))
        .replace(USER_TOKEN, &Token::WineUser.resolve(user))
}

fn is_hex_value_line(line: &str) -> bool {
    // "name"=hex:..., "name"=hex(7):..., or a wrapped continuation line.
    match line.split_once('=') {
        Some((_, value)) => {
            let v = value.trim_start();
            v.starts_with("hex:") || v.starts_with("hex(")
        }
        None => false,
    }
}

fn hex_line_embeds_user(line: &str, user: &str) -> bool {
    let Some((_, value)) = line.split_once(':') else {
        return false;
    };
    let bytes: Vec<u8> = value
        .split(',')
        .filter_map(|b| u8::from_str_radix(b.trim().trim_end_matches('\\'), 16).ok())
        .collect();
    if bytes.len() < 2 {
        return false;
    }
    // Registry binary strings are UTF-16LE; decode the low bytes.
    let narrow: String = bytes
        .chunks(2)
        .filter_map(|c| {
            if c.len() == 2 && c[1] == 0 {
                Some(char::from(c[0]))
            } else {
                None
            }
        })
        .collect();
    narrow.to_lowercase().contains(&user.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer() -> Tokenizer {
        Tokenizer::new("alice").unwrap()
    }

    #[test]
    fn rejects_invalid_users() {
        assert!(Tokenizer::new("").is_err());
        assert!(Tokenizer::new("a/b").is_err());
        assert!(Tokenizer::new("..").is_err());
    }

    #[test]
    fn tokenizes_double_backslash_registry_form() {
        let mut map = TokenMap::default();
        let input = r#""Desktop"="C:\\users\\alice\\Desktop""#;
        let out = tokenizer().tokenize_registry(input, &mut map).unwrap();
        assert_eq!(out, r#""Desktop"="C:\\users\\__WINE_USER__\\Desktop""#);
        assert_eq!(map.binding(Token::WineUser), Some("alice"));
    }

    #[test]
    fn tokenizes_single_backslash_and_unix_forms() {
        let mut map = TokenMap::default();
        let input = "dir=C:\\users\\alice\\AppData\nlog=/home/alice/.cache/app.log\n";
        let out = tokenizer().tokenize_text(input, &mut map).unwrap();
        assert_eq!(
            out,
            "dir=C:\\users\\__WINE_USER__\\AppData\nlog=__USER_HOME__/.cache/app.log\n"
        );
        assert_eq!(map.replacements, 2);
    }

    #[test]
    fn matching_is_case_insensitive_for_windows_paths() {
        let mut map = TokenMap::default();
        let input = r"c:\\USERS\\Alice\\Documents";
        let out = tokenizer().tokenize_registry(input, &mut map).unwrap();
        assert_eq!(out, r"c:\\USERS\\__WINE_USER__\\Documents");
        assert!(out.contains(USER_TOKEN));
    }

    #[test]
    fn repeated_occurrences_reduce_to_one_binding() {
        let mut map = TokenMap::default();
        let input = "/home/alice/a\n/home/alice/b\n/home/alice/c\n";
        let out = tokenizer().tokenize_text(input, &mut map).unwrap();
        assert_eq!(out.matches(HOME_TOKEN).count(), 3);
        assert_eq!(map.binding(Token::UserHome), Some("/home/alice"));
        assert_eq!(map.replacements, 3);
    }

    #[test]
    fn other_user_names_are_left_alone() {
        let mut map = TokenMap::default();
        let input = r"C:\\users\\Public\\Desktop and /home/bob/file";
        let out = tokenizer().tokenize_registry(input, &mut map).unwrap();
        assert_eq!(out, input);
        assert!(map.is_empty());
    }

    #[test]
    fn username_prefix_of_longer_name_does_not_match() {
        let mut map = TokenMap::default();
        let input = "/home/alicesmith/file";
        let out = tokenizer().tokenize_text(input, &mut map).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn binding_two_values_to_one_token_collides() {
        let mut map = TokenMap::default();
        map.bind(Token::WineUser, "alice").unwrap();
        map.bind(Token::WineUser, "alice").unwrap();
        assert!(matches!(
            map.bind(Token::WineUser, "bob"),
            Err(TokenError::Collision { .. })
        ));
    }

    #[test]
    fn hex_values_are_untouched_but_warned() {
        let mut map = TokenMap::default();
        // "C:\users\alice" in UTF-16LE
        let encoded: String = "C:\\users\\alice"
            .bytes()
            .map(|b| format!("{b:02x},00"))
            .collect::<Vec<_>>()
            .join(",");
        let input = format!("\"RecentPath\"=hex:{encoded}\n");
        let out = tokenizer().tokenize_registry(&input, &mut map).unwrap();
        assert_eq!(out, input, "binary values must never be rewritten");
        assert_eq!(map.warnings.len(), 1);
        assert!(map.warnings[0].contains("line 1"));
    }

    #[test]
    fn hex_values_without_user_path_produce_no_warning() {
        let mut map = TokenMap::default();
        let input = "\"Blob\"=hex:de,ad,be,ef\n";
        let out = tokenizer().tokenize_registry(input, &mut map).unwrap();
        assert_eq!(out, input);
        assert!(map.warnings.is_empty());
    }

    #[test]
    fn resolution_round_trips_for_same_user() {
        let user = RealUser::new("alice", "/home/alice");
        let mut map = TokenMap::default();
        let original = "path=C:\\\\users\\\\alice\\\\Documents\nhome=/home/alice/.config\n";
        let tokenized = tokenizer().tokenize_registry(original, &mut map).unwrap();
        assert_eq!(resolve(&tokenized, &user), original);
    }

    #[test]
    fn resolution_retargets_for_different_user() {
        let bob = RealUser::new("bob", "/var/home/bob");
        let mut map = TokenMap::default();
        let original = "home=/home/alice/.config\nwin=C:\\users\\alice\\Desktop\n";
        let tokenized = tokenizer().tokenize_text(original, &mut map).unwrap();
        let resolved = resolve(&tokenized, &bob);
        assert_eq!(
            resolved,
            "home=/var/home/bob/.config\nwin=C:\\users\\bob\\Desktop\n"
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        let user = RealUser::new("carol", "/home/carol");
        let mut map = TokenMap::default();
        let tokenized = tokenizer()
            .tokenize_text("home=/home/alice\n", &mut map)
            .unwrap();
        let once = resolve(&tokenized, &user);
        let twice = resolve(&once, &user);
        assert_eq!(once, twice);
    }

    #[test]
    fn custom_home_is_recorded_in_binding() {
        let mut map = TokenMap::default();
        let tok = Tokenizer::new("alice").unwrap().with_home("/srv/homes/alice");
        tok.tokenize_text("/home/alice/x", &mut map).unwrap();
        assert_eq!(map.binding(Token::UserHome), Some("/srv/homes/alice"));
    }
}
