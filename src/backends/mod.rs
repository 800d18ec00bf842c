// Backend modules: everything that talks to the OS or to external tools

pub mod command;
pub mod docker;
pub mod lookup;
pub mod process;

/// Platform identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOS,
}

impl Platform {
    pub fn current() -> Self {
        #[cfg(target_os = "linux")]
        return Platform::Linux;

        #[cfg(target_os = "macos")]
        return Platform::MacOS;

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        compile_error!("Unsupported platform - only Linux and macOS are currently supported");
    }
}
