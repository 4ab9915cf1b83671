// Constants shared by the registrar crates: default paths, well-known keys of
// the runner configuration file, default global parameters and exit codes.

use std::fmt;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Well-known files the registrar touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnownConfigFile {
    /// The runner service configuration file.
    RunnerConfig,
    /// The system id file the service writes on first start.
    SystemId,
}

impl fmt::Display for WellKnownConfigFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ---------------------------------------------------------------------------
// Nested constant groups
// ---------------------------------------------------------------------------

pub mod path {
    pub const RUNNER_CONFIG: &str = "/etc/gitlab-runner/config.toml";
    pub const RUNNER_SYSTEM_ID: &str = "/etc/gitlab-runner/.runner_system_id";
    pub const RUNNER_BINARY: &str = "gitlab-runner";
}

/// Keys of the runner configuration file.
pub mod keys {
    pub const RUNNERS: &str = "runners";
    pub const NAME: &str = "name";
    pub const URL: &str = "url";
    pub const TOKEN: &str = "token";
    pub const EXECUTOR: &str = "executor";
    pub const DOCKER: &str = "docker";
    pub const IMAGE: &str = "image";
}

/// Subcommands and flags of the external runner binary.
pub mod command_line {
    pub mod commands {
        pub const REGISTER: &str = "register";
        pub const UNREGISTER: &str = "unregister";
        pub const STATUS: &str = "status";
    }

    pub mod flags {
        pub const NON_INTERACTIVE: &str = "--non-interactive";
        pub const CONFIG: &str = "--config";
        pub const URL: &str = "--url";
        pub const TOKEN: &str = "--token";
        pub const NAME: &str = "--name";
        pub const EXECUTOR: &str = "--executor";
        pub const DOCKER_IMAGE: &str = "--docker-image";
        pub const TEMPLATE_CONFIG: &str = "--template-config";
    }

    pub mod status {
        pub const RUNNING: &str = "Service is running";
        pub const STOPPED: &str = "Service has stopped";
    }
}

pub mod variables {
    pub const PRINT_LOG_TO_STDOUT: &str = "REGISTRAR_PRINT_LOG_TO_STDOUT";
    pub const TOKEN: &str = "REGISTRAR_TOKEN";
}

pub mod return_code {
    pub const SUCCESS: i32 = 0;
    pub const TERMINATED_ERROR: i32 = 1;
    pub const INVALID_ARGUMENTS: i32 = 2;
}

/// Global parameters seeded into a fresh configuration when the caller
/// supplies none of their own.
pub fn default_globals() -> toml::Table {
    let mut session_server = toml::Table::new();
    session_server.insert("session_timeout".into(), toml::Value::Integer(1800));

    let mut globals = toml::Table::new();
    globals.insert("concurrent".into(), toml::Value::Integer(1));
    globals.insert("check_interval".into(), toml::Value::Integer(0));
    globals.insert(
        "connection_max_age".into(),
        toml::Value::String("15m0s".into()),
    );
    globals.insert("shutdown_timeout".into(), toml::Value::Integer(0));
    globals.insert("session_server".into(), toml::Value::Table(session_server));
    globals
}
