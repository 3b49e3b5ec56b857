//! SteamCMD command-line construction.

use std::fmt;
use std::path::Path;

/// Final token SteamCMD needs to exit after running the script.
pub const QUIT: &str = "+quit";

/// Builder for one SteamCMD invocation.
///
/// `+force_install_dir` has to come before `+login`, so the builder keeps the
/// install dir and login apart from the ordered list of actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SteamCmdCommand {
    install_dir: Option<String>,
    login: Option<String>,
    actions: Vec<String>,
}

impl SteamCmdCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install_dir(mut self, dir: &Path) -> Self {
        self.install_dir = Some(dir.to_string_lossy().into_owned());
        self
    }

    /// Log in as `username`, or anonymously when it is empty.
    pub fn login(mut self, username: &str) -> Self {
        let username = username.trim();
        self.login = Some(if username.is_empty() {
            "anonymous".to_string()
        } else {
            username.to_string()
        });
        self
    }

    pub fn app_update(mut self, app_id: u32, validate: bool) -> Self {
        self.actions.push("+app_update".to_string());
        self.actions.push(app_id.to_string());
        if validate {
            self.actions.push("validate".to_string());
        }
        self
    }

    pub fn workshop_download(mut self, game_id: u32, item_id: u64, validate: bool) -> Self {
        self.actions.push("+workshop_download_item".to_string());
        self.actions.push(game_id.to_string());
        self.actions.push(item_id.to_string());
        if validate {
            self.actions.push("validate".to_string());
        }
        self
    }

    /// Refresh app info and print the install state line for `app_id`.
    pub fn app_status(mut self, app_id: u32) -> Self {
        self.actions.push("+app_info_update".to_string());
        self.actions.push("1".to_string());
        self.actions.push("+app_status".to_string());
        self.actions.push(app_id.to_string());
        self
    }

    /// Arguments in execution order, terminated by `+quit`.
    pub fn into_args(self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.actions.len() + 5);
        if let Some(dir) = self.install_dir {
            args.push("+force_install_dir".to_string());
            args.push(dir);
        }
        if let Some(login) = self.login {
            args.push("+login".to_string());
            args.push(login);
        }
        args.extend(self.actions);
        ensure_quit(&mut args);
        args
    }
}

impl fmt::Display for SteamCmdCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clone().into_args().join(" "))
    }
}

/// Append `+quit` unless the script already ends SteamCMD.
pub fn ensure_quit(args: &mut Vec<String>) {
    if !args.iter().any(|a| a.eq_ignore_ascii_case(QUIT)) {
        args.push(QUIT.to_string());
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{ensure_quit, SteamCmdCommand};

    #[test]
    fn install_dir_precedes_login_and_quit_is_last() {
        let cmd = SteamCmdCommand::new()
            .login("")
            .install_dir(Path::new("/srv/servers/x"))
            .app_update(12345, true);
        assert_eq!(
            cmd.to_string(),
            "+force_install_dir /srv/servers/x +login anonymous +app_update 12345 validate +quit"
        );
    }

    #[test]
    fn workshop_download_lists_game_and_item() {
        let args = SteamCmdCommand::new()
            .login("anonymous")
            .workshop_download(107410, 450814997, false)
            .into_args();
        assert_eq!(
            args,
            vec![
                "+login",
                "anonymous",
                "+workshop_download_item",
                "107410",
                "450814997",
                "+quit"
            ]
        );
    }

    #[test]
    fn app_status_refreshes_info_first() {
        let line = SteamCmdCommand::new().login("").app_status(2394010).to_string();
        assert!(line.contains("+app_info_update 1 +app_status 2394010"));
    }

    #[test]
    fn quit_is_not_duplicated() {
        let mut args = vec!["+login".to_string(), "anonymous".to_string(), "+QUIT".to_string()];
        ensure_quit(&mut args);
        assert_eq!(args.len(), 3);
    }
}
