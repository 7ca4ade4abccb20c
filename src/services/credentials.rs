use crate::config::CredentialFields;
use crate::errors::BridgeError;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialKind {
    UserOAuth,
    BotOAuth,
    BrowserSession,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 3] = [
        CredentialKind::UserOAuth,
        CredentialKind::BotOAuth,
        CredentialKind::BrowserSession,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CredentialKind::UserOAuth => "user_oauth",
            CredentialKind::BotOAuth => "bot_oauth",
            CredentialKind::BrowserSession => "browser_session",
        }
    }
}

/// Exactly one credential is active per process.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    UserOAuth { token: String },
    BotOAuth { token: String },
    BrowserSession { token: String, cookie: String },
}

impl Credential {
    pub fn kind(&self) -> CredentialKind {
        match self {
            Credential::UserOAuth { .. } => CredentialKind::UserOAuth,
            Credential::BotOAuth { .. } => CredentialKind::BotOAuth,
            Credential::BrowserSession { .. } => CredentialKind::BrowserSession,
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Credential::UserOAuth { token }
            | Credential::BotOAuth { token }
            | Credential::BrowserSession { token, .. } => token,
        }
    }

    pub fn session_cookie(&self) -> Option<&str> {
        match self {
            Credential::BrowserSession { cookie, .. } => Some(cookie),
            _ => None,
        }
    }

    /// Short stable digest for logs; never the token itself.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.token().as_bytes());
        if let Some(cookie) = self.session_cookie() {
            hasher.update(b"\n");
            hasher.update(cookie.as_bytes());
        }
        hex::encode(&hasher.finalize()[..6])
    }

    /// Every secret this credential carries, for log scrubbing.
    pub fn secrets(&self) -> Vec<String> {
        let mut out = vec![self.token().to_string()];
        if let Some(cookie) = self.session_cookie() {
            out.push(cookie.to_string());
        }
        out
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

fn is_user_token(token: &str) -> bool {
    token.starts_with("xoxp-") || token.starts_with("xoxe.xoxp-")
}

fn expect_prefix(field: &str, token: &str, ok: bool, expected: &str) -> Result<(), BridgeError> {
    if ok {
        return Ok(());
    }
    let shown: String = token.chars().take(5).collect();
    Err(BridgeError::configuration(format!(
        "{} must start with {} (got '{}...')",
        field, expected, shown
    )))
}

/// Pure shape match over the four credential fields.
pub fn classify(fields: &CredentialFields) -> Result<Credential, BridgeError> {
    let session_fields = fields.xoxc.is_some() || fields.xoxd.is_some();
    let configured = [fields.xoxp.is_some(), fields.xoxb.is_some(), session_fields]
        .iter()
        .filter(|present| **present)
        .count();

    if configured == 0 {
        return Err(BridgeError::configuration("no Slack credential configured")
            .with_hint(
                "Set SLACK_MCP_XOXP_TOKEN, SLACK_MCP_XOXB_TOKEN, or both SLACK_MCP_XOXC_TOKEN and SLACK_MCP_XOXD_TOKEN.",
            ));
    }
    if configured > 1 {
        return Err(BridgeError::configuration(
            "more than one Slack credential configured; set exactly one",
        ));
    }

    if let Some(token) = &fields.xoxp {
        expect_prefix("SLACK_MCP_XOXP_TOKEN", token, is_user_token(token), "xoxp-")?;
        return Ok(Credential::UserOAuth {
            token: token.clone(),
        });
    }
    if let Some(token) = &fields.xoxb {
        expect_prefix("SLACK_MCP_XOXB_TOKEN", token, token.starts_with("xoxb-"), "xoxb-")?;
        return Ok(Credential::BotOAuth {
            token: token.clone(),
        });
    }

    match (&fields.xoxc, &fields.xoxd) {
        (Some(token), Some(cookie)) => {
            expect_prefix("SLACK_MCP_XOXC_TOKEN", token, token.starts_with("xoxc-"), "xoxc-")?;
            expect_prefix("SLACK_MCP_XOXD_TOKEN", cookie, cookie.starts_with("xoxd-"), "xoxd-")?;
            Ok(Credential::BrowserSession {
                token: token.clone(),
                cookie: cookie.clone(),
            })
        }
        _ => Err(BridgeError::configuration(
            "browser session credentials need both SLACK_MCP_XOXC_TOKEN and SLACK_MCP_XOXD_TOKEN",
        )),
    }
}
