use crate::config::BridgeConfig;
use crate::constants::gates;
use crate::errors::BridgeError;
use crate::services::credentials::CredentialKind;
use crate::services::rate_limiter::RateLimitTier;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    AuthTest,
    UsersList,
    ChannelsList,
    ConversationsHistory,
    ConversationsReplies,
    ConversationsAddMessage,
    ReactionsAdd,
    ReactionsRemove,
    AttachmentGetData,
    ConversationsSearchMessages,
    UsersSearch,
    UsergroupsList,
    UsergroupsCreate,
    UsergroupsUpdate,
    UsergroupsUsersUpdate,
    UsergroupsUsersList,
    UsergroupsMe,
    SavedList,
    SavedComplete,
}

impl Operation {
    pub const ALL: [Operation; 19] = [
        Operation::AuthTest,
        Operation::UsersList,
        Operation::ChannelsList,
        Operation::ConversationsHistory,
        Operation::ConversationsReplies,
        Operation::ConversationsAddMessage,
        Operation::ReactionsAdd,
        Operation::ReactionsRemove,
        Operation::AttachmentGetData,
        Operation::ConversationsSearchMessages,
        Operation::UsersSearch,
        Operation::UsergroupsList,
        Operation::UsergroupsCreate,
        Operation::UsergroupsUpdate,
        Operation::UsergroupsUsersUpdate,
        Operation::UsergroupsUsersList,
        Operation::UsergroupsMe,
        Operation::SavedList,
        Operation::SavedComplete,
    ];

    /// Stable external name.
    pub fn name(self) -> &'static str {
        match self {
            Operation::AuthTest => "auth_test",
            Operation::UsersList => "users_list",
            Operation::ChannelsList => "channels_list",
            Operation::ConversationsHistory => "conversations_history",
            Operation::ConversationsReplies => "conversations_replies",
            Operation::ConversationsAddMessage => "conversations_add_message",
            Operation::ReactionsAdd => "reactions_add",
            Operation::ReactionsRemove => "reactions_remove",
            Operation::AttachmentGetData => "attachment_get_data",
            Operation::ConversationsSearchMessages => "conversations_search_messages",
            Operation::UsersSearch => "users_search",
            Operation::UsergroupsList => "usergroups_list",
            Operation::UsergroupsCreate => "usergroups_create",
            Operation::UsergroupsUpdate => "usergroups_update",
            Operation::UsergroupsUsersUpdate => "usergroups_users_update",
            Operation::UsergroupsUsersList => "usergroups_users_list",
            Operation::UsergroupsMe => "usergroups_me",
            Operation::SavedList => "saved_list",
            Operation::SavedComplete => "saved_complete",
        }
    }

    pub fn from_name(name: &str) -> Option<Operation> {
        let needle = name.trim();
        Operation::ALL.iter().copied().find(|op| op.name() == needle)
    }

    /// Web API method, used by the REST and session surfaces.
    pub fn web_method(self) -> Option<&'static str> {
        Some(match self {
            Operation::AuthTest => "auth.test",
            Operation::UsersList => "users.list",
            Operation::ChannelsList => "conversations.list",
            Operation::ConversationsHistory => "conversations.history",
            Operation::ConversationsReplies => "conversations.replies",
            Operation::ConversationsAddMessage => "chat.postMessage",
            Operation::ReactionsAdd => "reactions.add",
            Operation::ReactionsRemove => "reactions.remove",
            Operation::AttachmentGetData => "files.info",
            Operation::ConversationsSearchMessages => "search.messages",
            Operation::UsergroupsList => "usergroups.list",
            Operation::UsergroupsCreate => "usergroups.create",
            Operation::UsergroupsUpdate => "usergroups.update",
            Operation::UsergroupsUsersUpdate => "usergroups.users.update",
            Operation::UsergroupsUsersList => "usergroups.users.list",
            Operation::SavedList => "saved.list",
            Operation::SavedComplete => "saved.update",
            Operation::UsersSearch | Operation::UsergroupsMe => return None,
        })
    }

    /// Path below `<edge_base>/<team_id>/`.
    pub fn edge_path(self) -> Option<&'static str> {
        match self {
            Operation::UsersSearch => Some("users/search"),
            _ => None,
        }
    }

    /// Served by several backend calls rather than one method.
    pub fn is_composite(self) -> bool {
        matches!(self, Operation::UsergroupsMe)
    }

    /// Human label used in logs and error messages.
    pub fn method_label(self) -> &'static str {
        self.web_method()
            .or_else(|| self.edge_path())
            .unwrap_or_else(|| self.name())
    }

    pub fn tier(self) -> RateLimitTier {
        match self {
            Operation::UsersList
            | Operation::ChannelsList
            | Operation::ConversationsSearchMessages
            | Operation::UsergroupsList
            | Operation::UsergroupsCreate
            | Operation::UsergroupsUpdate
            | Operation::UsergroupsUsersUpdate
            | Operation::UsergroupsUsersList
            | Operation::UsergroupsMe => RateLimitTier::Bulk,
            Operation::ConversationsHistory
            | Operation::ConversationsReplies
            | Operation::ReactionsAdd
            | Operation::ReactionsRemove
            | Operation::UsersSearch
            | Operation::SavedList
            | Operation::SavedComplete => RateLimitTier::Standard,
            Operation::AuthTest | Operation::AttachmentGetData => RateLimitTier::Boosted,
            Operation::ConversationsAddMessage => RateLimitTier::Posting,
        }
    }

    /// Env var that must be set for this operation when no allow-list is configured.
    pub fn gate_env(self) -> Option<&'static str> {
        match self {
            Operation::ConversationsAddMessage => Some(gates::ADD_MESSAGE),
            Operation::ReactionsAdd | Operation::ReactionsRemove => Some(gates::REACTION),
            Operation::AttachmentGetData => Some(gates::ATTACHMENT),
            Operation::SavedList => Some(gates::SAVED_LIST),
            Operation::SavedComplete => Some(gates::SAVED_COMPLETE),
            _ => None,
        }
    }

    /// Internal operations are always enabled and never listed to the host.
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            Operation::AuthTest | Operation::UsersList | Operation::UsergroupsUsersList
        )
    }

    /// Listed to the host and enabled even when an allow-list omits it.
    pub fn is_always_enabled(self) -> bool {
        matches!(self, Operation::UsersSearch)
    }

    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            Operation::ConversationsAddMessage
                | Operation::ReactionsAdd
                | Operation::ReactionsRemove
                | Operation::UsergroupsCreate
                | Operation::UsergroupsUpdate
                | Operation::UsergroupsUsersUpdate
                | Operation::UsergroupsMe
                | Operation::SavedComplete
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            Operation::AuthTest => "Identify the workspace and the authenticated user.",
            Operation::UsersList => "List cached workspace users.",
            Operation::ChannelsList => "List cached channels, optionally filtered by kind.",
            Operation::ConversationsHistory => "Fetch messages from a channel or DM.",
            Operation::ConversationsReplies => "Fetch a thread of replies.",
            Operation::ConversationsAddMessage => "Post a message to a channel or thread.",
            Operation::ReactionsAdd => "Add an emoji reaction to a message.",
            Operation::ReactionsRemove => "Remove an emoji reaction from a message.",
            Operation::AttachmentGetData => "Fetch file metadata.",
            Operation::ConversationsSearchMessages => "Search messages across the workspace.",
            Operation::UsersSearch => "Search users by name, display name or email.",
            Operation::UsergroupsList => "List user groups.",
            Operation::UsergroupsCreate => "Create a user group.",
            Operation::UsergroupsUpdate => "Update a user group.",
            Operation::UsergroupsUsersUpdate => "Replace the members of a user group.",
            Operation::UsergroupsUsersList => "List the members of a user group.",
            Operation::UsergroupsMe => {
                "List your user groups (action=list), or join or leave one (action=join|leave, usergroup_id)."
            }
            Operation::SavedList => "List saved-for-later items.",
            Operation::SavedComplete => "Mark a saved item as completed.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendSurface {
    Rest,
    Session,
    Edge,
    LocalDirectory,
}

/// Static routing table. `None` means the operation is not registered for
/// this credential kind.
pub fn surface_for(kind: CredentialKind, operation: Operation) -> Option<BackendSurface> {
    use BackendSurface::*;
    use CredentialKind::*;
    match (operation, kind) {
        (Operation::SavedList | Operation::SavedComplete, BrowserSession) => Some(Session),
        (Operation::SavedList | Operation::SavedComplete, UserOAuth | BotOAuth) => None,

        (Operation::ConversationsSearchMessages, BotOAuth) => None,
        (Operation::ConversationsSearchMessages, UserOAuth) => Some(Rest),
        (Operation::ConversationsSearchMessages, BrowserSession) => Some(Session),

        (Operation::UsersSearch, BrowserSession) => Some(Edge),
        (Operation::UsersSearch, UserOAuth | BotOAuth) => Some(LocalDirectory),

        (_, UserOAuth | BotOAuth) => Some(Rest),
        (_, BrowserSession) => Some(Session),
    }
}

/// Operation allow-list and env gating, resolved once at startup.
#[derive(Debug, Clone)]
pub struct OperationGate {
    enabled: BTreeSet<Operation>,
}

impl OperationGate {
    pub fn from_config(config: &BridgeConfig) -> Result<Self, BridgeError> {
        Self::new(&config.enabled_operations, &config.gate_flags)
    }

    pub fn new(allow_list: &[String], gate_flags: &BTreeSet<String>) -> Result<Self, BridgeError> {
        let mut enabled = BTreeSet::new();
        if allow_list.is_empty() {
            for op in Operation::ALL {
                let allowed = match op.gate_env() {
                    Some(var) => gate_flags.contains(var),
                    None => true,
                };
                if allowed {
                    enabled.insert(op);
                }
            }
            return Ok(Self { enabled });
        }

        let mut unknown = Vec::new();
        for name in allow_list {
            match Operation::from_name(name) {
                Some(op) => {
                    enabled.insert(op);
                }
                None => unknown.push(name.clone()),
            }
        }
        if !unknown.is_empty() {
            let valid: Vec<&str> = Operation::ALL
                .iter()
                .filter(|op| !op.is_internal())
                .map(|op| op.name())
                .collect();
            return Err(BridgeError::configuration(format!(
                "SLACK_MCP_ENABLED_OPERATIONS has unknown operations: {}",
                unknown.join(", ")
            ))
            .with_hint(format!("Valid operations: {}", valid.join(", "))));
        }
        for op in Operation::ALL
            .iter()
            .filter(|op| op.is_internal() || op.is_always_enabled())
        {
            enabled.insert(*op);
        }
        Ok(Self { enabled })
    }

    pub fn allows(&self, operation: Operation) -> bool {
        self.enabled.contains(&operation)
    }
}

/// The only consumer of the credential kind after classification.
#[derive(Debug, Clone)]
pub struct CredentialRouter {
    kind: CredentialKind,
    gate: OperationGate,
}

impl CredentialRouter {
    pub fn new(kind: CredentialKind, gate: OperationGate) -> Self {
        Self { kind, gate }
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    /// Surface for an externally invoked operation, honoring the gate.
    pub fn route(&self, operation: Operation) -> Result<BackendSurface, BridgeError> {
        if !self.gate.allows(operation) {
            let mut err = BridgeError::operation_disabled(format!(
                "operation '{}' is not enabled",
                operation.name()
            ));
            if let Some(var) = operation.gate_env() {
                err = err.with_hint(format!(
                    "Set {} or list '{}' in SLACK_MCP_ENABLED_OPERATIONS.",
                    var,
                    operation.name()
                ));
            }
            return Err(err);
        }
        surface_for(self.kind, operation).ok_or_else(|| {
            BridgeError::operation_disabled(format!(
                "operation '{}' is not available with {} credentials",
                operation.name(),
                self.kind.as_str()
            ))
        })
    }

    /// Operations a host may expose: enabled, registered, not internal.
    pub fn enabled_operations(&self) -> Vec<Operation> {
        Operation::ALL
            .iter()
            .copied()
            .filter(|op| !op.is_internal())
            .filter(|op| self.gate.allows(*op))
            .filter(|op| surface_for(self.kind, *op).is_some())
            .collect()
    }
}
