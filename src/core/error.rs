use thiserror::Error;

/// Core error types for pfwd
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// nftables command execution failed
    #[error("nftables error: {message}")]
    Nftables {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// Input validation failed
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Kernel-parameter operation failed
    #[error("sysctl error: {0}")]
    Sysctl(String),

    /// Service-manager operation failed
    #[error("service error: {0}")]
    Service(String),

    /// Privilege escalation failed
    #[error("Elevation error: {0}")]
    Elevation(String),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Database of nftables error patterns and their translations
pub struct NftablesErrorPattern;

impl NftablesErrorPattern {
    /// Matches an error message against known patterns and returns a
    /// user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        // Permission errors
        if lower.contains("permission denied") || lower.contains("operation not permitted") {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Run pfwd as root or configure sudo/run0")
                .with_suggestion("Check if CAP_NET_ADMIN capability is available");
        }

        // Table/chain not present yet - ordered before the missing-binary
        // check because nft reports a missing table as "No such file or
        // directory" too
        if (lower.contains("table") || lower.contains("chain"))
            && (lower.contains("does not exist")
                || lower.contains("not found")
                || lower.contains("no such file"))
        {
            return ErrorTranslation::new("Firewall table or chain does not exist")
                .with_suggestion("The port_forward table is created on the first add")
                .with_suggestion("Add a forward first, then retry this operation");
        }

        // Missing nftables
        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("nftables is not installed or not found in PATH")
                .with_suggestion("Install nftables: sudo apt install nftables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install nftables  (Fedora/RHEL)")
                .with_suggestion("Or: sudo pacman -S nftables  (Arch)");
        }

        // Syntax errors
        if lower.contains("could not process rule") || lower.contains("syntax error") {
            return ErrorTranslation::new("Invalid firewall rule syntax")
                .with_suggestion("Verify port numbers are between 1 and 65535")
                .with_suggestion("Ensure the remote address is valid for the chosen family");
        }

        // Port range errors
        if lower.contains("invalid port") || (lower.contains("port") && lower.contains("range")) {
            return ErrorTranslation::new("Invalid port")
                .with_suggestion("Port numbers must be between 1 and 65535");
        }

        // Resource busy
        if lower.contains("resource busy") || lower.contains("device or resource busy") {
            return ErrorTranslation::new("Firewall resource is busy")
                .with_suggestion("Another process may be modifying nftables")
                .with_suggestion(
                    "Check for conflicting firewall managers: sudo systemctl status firewalld ufw",
                );
        }

        // Netlink errors
        if lower.contains("netlink") {
            return ErrorTranslation::new("Communication error with kernel netlink interface")
                .with_suggestion("Check kernel modules: lsmod | grep nf_tables")
                .with_suggestion("Load nf_tables module: sudo modprobe nf_tables");
        }

        // Generic fallback
        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Verify nftables is working: sudo nft list ruleset")
    }
}
