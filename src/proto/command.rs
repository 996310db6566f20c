use std::fmt::Display;

/// Query code used for continuous sampling.
pub const QUERY_CODE: &str = "Q";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Request the current weight (`Q`)
    Query,
    /// Any other command code, sent verbatim
    Raw(String),
}

impl Command {
    pub fn code(&self) -> &str {
        match self {
            Command::Query => QUERY_CODE,
            Command::Raw(code) => code.as_str(),
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl From<&str> for Command {
    fn from(code: &str) -> Self {
        if code == QUERY_CODE {
            Command::Query
        } else {
            Command::Raw(code.to_string())
        }
    }
}

impl From<String> for Command {
    fn from(code: String) -> Self {
        if code == QUERY_CODE {
            Command::Query
        } else {
            Command::Raw(code)
        }
    }
}
