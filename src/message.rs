//! Command and reply tokens exchanged with clients.
//!
//! A command arrives as a single token string; its arguments follow on the
//! stream and are read by the matching handler. Replies are fixed tokens.

/// Commands a client can issue on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Register,
    Login,
    Upload,
    Retrieve,
    Logout,
    Heartbeat,
}

impl Command {
    /// Parse a command token. Unknown tokens are handled by the session loop
    /// with an `UNKNOWN_COMMAND` reply rather than an error.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "REGISTER" => Some(Command::Register),
            "LOGIN" => Some(Command::Login),
            "UPLOAD" => Some(Command::Upload),
            "RETRIEVE" => Some(Command::Retrieve),
            "LOGOUT" => Some(Command::Logout),
            "HEARTBEAT" => Some(Command::Heartbeat),
            _ => None,
        }
    }
}

/// Reply tokens the server writes back to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    RegisterSuccess,
    RegisterFailed,
    UsernameTaken,
    AuthSuccess,
    AuthFailed,
    UploadSuccess,
    UploadFailed,
    DuplicateFile,
    AccessDenied,
    LogoutSuccess,
    HeartbeatAck,
    UnknownCommand,
}

impl Reply {
    /// The wire token for this reply.
    pub fn token(self) -> &'static str {
        match self {
            Reply::RegisterSuccess => "REGISTER_SUCCESS",
            Reply::RegisterFailed => "REGISTER_FAILED",
            Reply::UsernameTaken => "USERNAME_TAKEN",
            Reply::AuthSuccess => "AUTH_SUCCESS",
            Reply::AuthFailed => "AUTH_FAILED",
            Reply::UploadSuccess => "UPLOAD_SUCCESS",
            Reply::UploadFailed => "UPLOAD_FAILED",
            Reply::DuplicateFile => "DUPLICATE_FILE",
            Reply::AccessDenied => "ACCESS_DENIED",
            Reply::LogoutSuccess => "LOGOUT_SUCCESS",
            Reply::HeartbeatAck => "HEARTBEAT_ACK",
            Reply::UnknownCommand => "UNKNOWN_COMMAND",
        }
    }
}
