//! Launching the user's browser for interactive login

/// Opens the authorization URL for the user.
///
/// The flow controller only talks to this trait so tests can stand in for the
/// user: a fake browser receives the URL and drives the redirect itself.
pub trait Browser: Send + Sync {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Default browser of the desktop session. Returns once the launcher is
/// spawned, without waiting for it to exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that_detached(url)
    }
}
