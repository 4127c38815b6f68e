//! Window controller and terminal content source over the tmux CLI.

use std::path::Path;

use tracing::debug;

use crate::capture::{Capture, capture_pane};
use crate::error::TmuxError;
use crate::executor::TmuxCommandRunner;
use crate::pane_info::{
    LIST_PANES_FORMAT, LIST_WINDOWS_FORMAT, PaneInfo, WindowInfo, parse_list_panes_output,
    parse_list_windows_output,
};

/// Process/window controller the engine drives.
pub trait WindowController: Send + Sync {
    /// Open a window in `working_dir` and start `launch_command` in it.
    fn create(
        &self,
        working_dir: &Path,
        window_name: &str,
        launch_command: &str,
    ) -> Result<String, TmuxError>;
    fn list(&self) -> Result<Vec<WindowInfo>, TmuxError>;
    fn exists(&self, window_id: &str) -> Result<bool, TmuxError>;
    fn kill(&self, window_id: &str) -> Result<(), TmuxError>;
    fn list_panes(&self, window_id: &str) -> Result<Vec<PaneInfo>, TmuxError>;
    /// Every pane of every managed window in one call.
    fn list_all_panes(&self) -> Result<Vec<PaneInfo>, TmuxError>;
    /// Type `text` into a pane and press Enter. `Ok(false)` if the pane is gone.
    fn send_keys(&self, pane_id: &str, text: &str) -> Result<bool, TmuxError>;
}

/// Source of raw terminal content.
pub trait TerminalSource: Send + Sync {
    fn capture(&self, pane_id: &str) -> Result<Capture, TmuxError>;
}

impl<T: WindowController + ?Sized> WindowController for &T {
    fn create(&self, dir: &Path, name: &str, cmd: &str) -> Result<String, TmuxError> {
        (**self).create(dir, name, cmd)
    }
    fn list(&self) -> Result<Vec<WindowInfo>, TmuxError> {
        (**self).list()
    }
    fn exists(&self, window_id: &str) -> Result<bool, TmuxError> {
        (**self).exists(window_id)
    }
    fn kill(&self, window_id: &str) -> Result<(), TmuxError> {
        (**self).kill(window_id)
    }
    fn list_panes(&self, window_id: &str) -> Result<Vec<PaneInfo>, TmuxError> {
        (**self).list_panes(window_id)
    }
    fn list_all_panes(&self) -> Result<Vec<PaneInfo>, TmuxError> {
        (**self).list_all_panes()
    }
    fn send_keys(&self, pane_id: &str, text: &str) -> Result<bool, TmuxError> {
        (**self).send_keys(pane_id, text)
    }
}

impl<T: TerminalSource + ?Sized> TerminalSource for &T {
    fn capture(&self, pane_id: &str) -> Result<Capture, TmuxError> {
        (**self).capture(pane_id)
    }
}

/// tmux-backed controller scoped to one tmux session.
#[derive(Debug, Clone)]
pub struct TmuxController<R> {
    runner: R,
    session_name: String,
}

impl<R: TmuxCommandRunner> TmuxController<R> {
    pub fn new(runner: R, session_name: impl Into<String>) -> Self {
        Self {
            runner,
            session_name: session_name.into(),
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Create the managed tmux session if it does not exist yet.
    pub fn ensure_session(&self) -> Result<(), TmuxError> {
        let target = format!("={}", self.session_name);
        if self.runner.run(&["has-session", "-t", &target]).is_ok() {
            return Ok(());
        }
        debug!(session = %self.session_name, "creating tmux session");
        self.runner
            .run(&["new-session", "-d", "-s", &self.session_name])?;
        Ok(())
    }

    fn session_target(&self) -> String {
        format!("{}:", self.session_name)
    }
}

impl<R: TmuxCommandRunner> WindowController for TmuxController<R> {
    fn create(
        &self,
        working_dir: &Path,
        window_name: &str,
        launch_command: &str,
    ) -> Result<String, TmuxError> {
        let dir = working_dir.to_string_lossy();
        let target = self.session_target();
        let output = self.runner.run(&[
            "new-window",
            "-d",
            "-t",
            &target,
            "-n",
            window_name,
            "-c",
            &dir,
            "-P",
            "-F",
            "#{window_id}",
        ])?;
        let window_id = output.trim().to_string();
        if window_id.is_empty() {
            return Err(TmuxError::CommandFailed(
                "new-window returned no window id".into(),
            ));
        }
        // The agent runs inside the window's shell so an exit leaves the shell behind.
        self.send_keys(&window_id, launch_command)?;
        Ok(window_id)
    }

    fn list(&self) -> Result<Vec<WindowInfo>, TmuxError> {
        let target = self.session_target();
        match self
            .runner
            .run(&["list-windows", "-t", &target, "-F", LIST_WINDOWS_FORMAT])
        {
            Ok(output) => parse_list_windows_output(&output),
            Err(TmuxError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn exists(&self, window_id: &str) -> Result<bool, TmuxError> {
        match self
            .runner
            .run(&["display-message", "-p", "-t", window_id, "#{window_id}"])
        {
            Ok(output) => Ok(output.trim() == window_id),
            Err(TmuxError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn kill(&self, window_id: &str) -> Result<(), TmuxError> {
        match self.runner.run(&["kill-window", "-t", window_id]) {
            Ok(_) | Err(TmuxError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn list_panes(&self, window_id: &str) -> Result<Vec<PaneInfo>, TmuxError> {
        let output = self
            .runner
            .run(&["list-panes", "-t", window_id, "-F", LIST_PANES_FORMAT])?;
        parse_list_panes_output(&output)
    }

    fn list_all_panes(&self) -> Result<Vec<PaneInfo>, TmuxError> {
        let target = self.session_target();
        match self
            .runner
            .run(&["list-panes", "-s", "-t", &target, "-F", LIST_PANES_FORMAT])
        {
            Ok(output) => parse_list_panes_output(&output),
            Err(TmuxError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn send_keys(&self, pane_id: &str, text: &str) -> Result<bool, TmuxError> {
        match self.runner.run(&["send-keys", "-t", pane_id, "-l", text]) {
            Ok(_) => {}
            Err(TmuxError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        }
        self.runner.run(&["send-keys", "-t", pane_id, "Enter"])?;
        Ok(true)
    }
}

impl<R: TmuxCommandRunner> TerminalSource for TmuxController<R> {
    fn capture(&self, pane_id: &str) -> Result<Capture, TmuxError> {
        capture_pane(&self.runner, pane_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<Vec<String>>>,
        missing: Vec<&'static str>,
    }

    impl RecordingRunner {
        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().expect("lock").clone()
        }
    }

    impl TmuxCommandRunner for RecordingRunner {
        fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
            self.calls
                .lock()
                .expect("lock")
                .push(args.iter().map(|s| s.to_string()).collect());
            if args.iter().any(|a| self.missing.contains(a)) {
                return Err(TmuxError::NotFound(format!("can't find window: {args:?}")));
            }
            match args.first() {
                Some(&"new-window") => Ok("@7\n".to_string()),
                Some(&"display-message") => Ok(format!("{}\n", args[3])),
                Some(&"list-windows") => Ok("@7\tproject-x\t/work/x\tclaude\n".to_string()),
                _ => Ok(String::new()),
            }
        }
    }

    #[test]
    fn create_opens_window_then_types_command() {
        let runner = RecordingRunner::default();
        let ctl = TmuxController::new(&runner, "relay");
        let id = ctl
            .create(Path::new("/work/x"), "project-x", "claude --continue")
            .expect("create");
        assert_eq!(id, "@7");

        let calls = runner.calls();
        assert_eq!(calls[0][0], "new-window");
        assert!(calls[0].contains(&"relay:".to_string()));
        assert!(calls[0].contains(&"/work/x".to_string()));
        assert_eq!(calls[1], ["send-keys", "-t", "@7", "-l", "claude --continue"]);
        assert_eq!(calls[2], ["send-keys", "-t", "@7", "Enter"]);
    }

    #[test]
    fn exists_maps_not_found_to_false() {
        let runner = RecordingRunner {
            missing: vec!["@9"],
            ..Default::default()
        };
        let ctl = TmuxController::new(&runner, "relay");
        assert!(ctl.exists("@7").expect("exists"));
        assert!(!ctl.exists("@9").expect("exists"));
    }

    #[test]
    fn send_keys_to_missing_pane_returns_false() {
        let runner = RecordingRunner {
            missing: vec!["%4"],
            ..Default::default()
        };
        let ctl = TmuxController::new(&runner, "relay");
        assert!(!ctl.send_keys("%4", "hello").expect("send"));
        assert_eq!(runner.calls().len(), 1, "Enter is not sent to a missing pane");
    }

    #[test]
    fn kill_is_idempotent() {
        let runner = RecordingRunner {
            missing: vec!["@9"],
            ..Default::default()
        };
        let ctl = TmuxController::new(&runner, "relay");
        ctl.kill("@9").expect("kill of missing window is ok");
    }

    #[test]
    fn list_parses_windows() {
        let runner = RecordingRunner::default();
        let ctl = TmuxController::new(&runner, "relay");
        let windows = ctl.list().expect("list");
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].window_name, "project-x");
    }
}
