//! The closed command table.
//!
//! Inbound text is resolved to one of these commands once, up front; there is
//! no dynamic dispatch. Each command carries its capability requirement so
//! the gate wiring can enforce it uniformly.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearTarget {
    /// The caller's own session.
    Own,
    /// Every session (operator only).
    All,
    Id(i64),
    Username(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Status,
    Pair { number: String },
    Sessions,
    Clear { target: ClearTarget },
    Send { number: String, text: String },
    History { page: usize },
    Stats,
    Maintenance { action: Option<bool> },
    Broadcast { args: String },
    SetCooldown { args: String },
    Grant { args: String },
    Revoke { args: String },
    PremiumList,
    Promote { args: String },
    Demote { args: String },
}

/// Who may invoke a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Everyone,
    /// Operator, non-expired premium, or an actor with their own connected
    /// session.
    Privileged,
    /// Admin allow-list or operator.
    Admin,
    Operator,
}

impl Command {
    /// Resolve inbound text to a command. Non-commands and malformed
    /// invocations of strict patterns return `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }
        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };
        // Accept the `/command@botname` form used in group chats.
        let head = head.split('@').next().unwrap_or(head);

        match head {
            "/start" => Some(Self::Start),
            "/status" => Some(Self::Status),
            "/pair" => {
                let number = digits(rest);
                (!number.is_empty()).then_some(Self::Pair { number })
            },
            "/sessions" => Some(Self::Sessions),
            "/clear" => parse_clear_target(rest).map(|target| Self::Clear { target }),
            "/send" => {
                let (number, text) = rest.split_once(char::is_whitespace)?;
                let number = digits(number);
                let text = text.trim();
                (!number.is_empty() && !text.is_empty()).then(|| Self::Send {
                    number,
                    text: text.to_string(),
                })
            },
            "/history" => {
                let page = if rest.is_empty() {
                    1
                } else {
                    rest.parse().ok()?
                };
                Some(Self::History { page })
            },
            "/stats" => Some(Self::Stats),
            "/maintenance" => {
                let action = match rest.to_ascii_lowercase().as_str() {
                    "on" => Some(true),
                    "off" => Some(false),
                    _ => None,
                };
                Some(Self::Maintenance { action })
            },
            "/broadcast" => Some(Self::Broadcast {
                args: rest.to_string(),
            }),
            "/setcooldown" => Some(Self::SetCooldown {
                args: rest.to_string(),
            }),
            "/grant" => Some(Self::Grant {
                args: rest.to_string(),
            }),
            "/revoke" => Some(Self::Revoke {
                args: rest.to_string(),
            }),
            "/premium" => Some(Self::PremiumList),
            "/promote" => Some(Self::Promote {
                args: rest.to_string(),
            }),
            "/demote" => Some(Self::Demote {
                args: rest.to_string(),
            }),
            _ => None,
        }
    }

    /// Canonical name, used for gate allow-list matching and logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "/start",
            Self::Status => "/status",
            Self::Pair { .. } => "/pair",
            Self::Sessions => "/sessions",
            Self::Clear { .. } => "/clear",
            Self::Send { .. } => "/send",
            Self::History { .. } => "/history",
            Self::Stats => "/stats",
            Self::Maintenance { .. } => "/maintenance",
            Self::Broadcast { .. } => "/broadcast",
            Self::SetCooldown { .. } => "/setcooldown",
            Self::Grant { .. } => "/grant",
            Self::Revoke { .. } => "/revoke",
            Self::PremiumList => "/premium",
            Self::Promote { .. } => "/promote",
            Self::Demote { .. } => "/demote",
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            Self::Start | Self::Status | Self::Pair { .. } | Self::Sessions | Self::Clear { .. } => {
                Capability::Everyone
            },
            Self::Send { .. } => Capability::Privileged,
            Self::Grant { .. } | Self::Revoke { .. } | Self::PremiumList => Capability::Admin,
            Self::History { .. }
            | Self::Stats
            | Self::Maintenance { .. }
            | Self::Broadcast { .. }
            | Self::SetCooldown { .. }
            | Self::Promote { .. }
            | Self::Demote { .. } => Capability::Operator,
        }
    }
}

fn parse_clear_target(rest: &str) -> Option<ClearTarget> {
    if rest.is_empty() {
        return Some(ClearTarget::Own);
    }
    if rest.eq_ignore_ascii_case("all") {
        return Some(ClearTarget::All);
    }
    if let Some(name) = rest.strip_prefix('@') {
        return (!name.is_empty()).then(|| ClearTarget::Username(name.to_string()));
    }
    rest.parse().ok().map(ClearTarget::Id)
}

fn digits(input: &str) -> String {
    input.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
mod tests {
    use {rstest::rstest, super::*};

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(Command::parse("hello there"), None);
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("/unknowncmd"), None);
    }

    #[test]
    fn bot_name_suffix_is_stripped() {
        assert_eq!(Command::parse("/status@tether_bot"), Some(Command::Status));
    }

    #[rstest]
    #[case("/pair 628123456", Some("628123456"))]
    #[case("/pair +62 812-3456", Some("628123456"))]
    #[case("/pair", None)]
    #[case("/pair abc", None)]
    fn pair_requires_digits(#[case] input: &str, #[case] number: Option<&str>) {
        let parsed = Command::parse(input);
        match number {
            Some(n) => assert_eq!(parsed, Some(Command::Pair { number: n.into() })),
            None => assert_eq!(parsed, None),
        }
    }

    #[test]
    fn send_needs_number_and_text() {
        assert_eq!(
            Command::parse("/send 628123 hello world"),
            Some(Command::Send {
                number: "628123".into(),
                text: "hello world".into()
            })
        );
        assert_eq!(Command::parse("/send 628123"), None);
        assert_eq!(Command::parse("/send"), None);
    }

    #[test]
    fn clear_targets() {
        assert_eq!(
            Command::parse("/clear"),
            Some(Command::Clear {
                target: ClearTarget::Own
            })
        );
        assert_eq!(
            Command::parse("/clear ALL"),
            Some(Command::Clear {
                target: ClearTarget::All
            })
        );
        assert_eq!(
            Command::parse("/clear 12345"),
            Some(Command::Clear {
                target: ClearTarget::Id(12345)
            })
        );
        assert_eq!(
            Command::parse("/clear @alice"),
            Some(Command::Clear {
                target: ClearTarget::Username("alice".into())
            })
        );
        assert_eq!(Command::parse("/clear junk"), None);
    }

    #[test]
    fn history_pages() {
        assert_eq!(Command::parse("/history"), Some(Command::History { page: 1 }));
        assert_eq!(Command::parse("/history 3"), Some(Command::History { page: 3 }));
        assert_eq!(Command::parse("/history x"), None);
    }

    #[test]
    fn maintenance_actions() {
        assert_eq!(
            Command::parse("/maintenance"),
            Some(Command::Maintenance { action: None })
        );
        assert_eq!(
            Command::parse("/maintenance on"),
            Some(Command::Maintenance { action: Some(true) })
        );
        assert_eq!(
            Command::parse("/maintenance OFF"),
            Some(Command::Maintenance {
                action: Some(false)
            })
        );
    }

    #[test]
    fn capability_table() {
        assert_eq!(Command::Status.capability(), Capability::Everyone);
        assert_eq!(
            Command::Send {
                number: "1".into(),
                text: "x".into()
            }
            .capability(),
            Capability::Privileged
        );
        assert_eq!(
            Command::Grant { args: String::new() }.capability(),
            Capability::Admin
        );
        assert_eq!(
            Command::Broadcast { args: String::new() }.capability(),
            Capability::Operator
        );
        assert_eq!(
            Command::Maintenance { action: None }.capability(),
            Capability::Operator
        );
    }

    #[test]
    fn names_match_patterns() {
        assert_eq!(Command::Status.name(), "/status");
        assert_eq!(
            Command::Pair {
                number: "628".into()
            }
            .name(),
            "/pair"
        );
    }
}
