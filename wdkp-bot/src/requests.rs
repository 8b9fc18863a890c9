//! Request line parsing
//!
//! One request per line:
//!
//! ```text
//! upload <tenant> <path> [author] [comment...]
//! query <tenant> [team=<id>] <player|class|all|loot:<text>|history:<player>>
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use wdkp_common::TenantId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("empty request")]
    Empty,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("missing {0}")]
    MissingArgument(&'static str),

    #[error("invalid tenant id '{0}'")]
    InvalidTenant(String),
}

/// What a query asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every standing in the team
    All,
    /// Loot whose item name contains the text
    Loot(String),
    /// A player's point history
    History(String),
    /// A player, or failing that a class group
    Name(String),
}

impl FromStr for Target {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RequestError::MissingArgument("query target"));
        }
        if s.eq_ignore_ascii_case("all") {
            return Ok(Target::All);
        }
        let prefixed = |prefix: &str| {
            s.get(..prefix.len())
                .filter(|head| head.eq_ignore_ascii_case(prefix))
                .map(|_| s[prefix.len()..].trim().to_string())
        };
        if let Some(text) = prefixed("loot:") {
            return non_empty(text, "loot search text").map(Target::Loot);
        }
        if let Some(player) = prefixed("history:") {
            return non_empty(player, "player name").map(Target::History);
        }
        Ok(Target::Name(s.to_string()))
    }
}

fn non_empty(text: String, what: &'static str) -> Result<String, RequestError> {
    if text.is_empty() {
        Err(RequestError::MissingArgument(what))
    } else {
        Ok(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Upload {
        tenant: TenantId,
        path: PathBuf,
        author: Option<String>,
        comment: String,
    },
    Query {
        tenant: TenantId,
        team: Option<String>,
        target: Target,
    },
}

impl Request {
    pub fn tenant(&self) -> TenantId {
        match self {
            Request::Upload { tenant, .. } | Request::Query { tenant, .. } => *tenant,
        }
    }
}

fn tenant_arg(word: Option<&str>) -> Result<TenantId, RequestError> {
    let word = word.ok_or(RequestError::MissingArgument("tenant id"))?;
    word.parse()
        .map_err(|_| RequestError::InvalidTenant(word.to_string()))
}

impl FromStr for Request {
    type Err = RequestError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(RequestError::Empty)?;

        match command.to_lowercase().as_str() {
            "upload" => {
                let tenant = tenant_arg(words.next())?;
                let path = words
                    .next()
                    .map(PathBuf::from)
                    .ok_or(RequestError::MissingArgument("dump path"))?;
                let author = words.next().map(str::to_string);
                let comment = words.collect::<Vec<_>>().join(" ");
                Ok(Request::Upload {
                    tenant,
                    path,
                    author,
                    comment,
                })
            }
            "query" => {
                let tenant = tenant_arg(words.next())?;
                let mut rest: Vec<&str> = words.collect();
                let team = match rest.first().and_then(|w| w.strip_prefix("team=")) {
                    Some(team) => {
                        let team = team.to_string();
                        rest.remove(0);
                        Some(team).filter(|t| !t.is_empty())
                    }
                    None => None,
                };
                let target = rest.join(" ").parse()?;
                Ok(Request::Query {
                    tenant,
                    team,
                    target,
                })
            }
            other => Err(RequestError::UnknownCommand(other.to_string())),
        }
    }
}
