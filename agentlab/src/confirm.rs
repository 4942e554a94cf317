//! Confirmation gate for destructive operations.

use agentlab_common::{CliError, ErrorKind};
use console::Term;
use is_terminal::IsTerminal;

/// Terminal capabilities needed to ask a yes/no question.
pub trait Prompter: Send + Sync {
    fn is_interactive(&self) -> bool;
    /// Show `prompt` and read one line of input.
    fn ask(&self, prompt: &str) -> std::io::Result<String>;
}

/// Prompts on stderr, reads from the terminal.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
    }

    fn ask(&self, prompt: &str) -> std::io::Result<String> {
        let term = Term::stderr();
        term.write_str(prompt)?;
        term.read_line()
    }
}

fn refused(action: &str, message: String) -> CliError {
    CliError::new(ErrorKind::ConfirmationRefused, message)
        .with_hint(format!("re-run with --force to {action}"))
}

/// Pass when forced; refuse in JSON mode or without a terminal; otherwise
/// require a typed `yes`.
pub fn confirm(
    action: &str,
    force: bool,
    json: bool,
    prompter: &dyn Prompter,
) -> Result<(), CliError> {
    if force {
        return Ok(());
    }
    if json {
        return Err(refused(
            action,
            format!("refusing to {action} without --force in --json mode"),
        ));
    }
    if !prompter.is_interactive() {
        return Err(refused(
            action,
            format!("refusing to {action} without an interactive terminal"),
        ));
    }

    let answer = prompter
        .ask(&format!("Confirm {action}? Type 'yes' to continue: "))
        .map_err(|e| refused(action, format!("failed to read confirmation: {e}")))?;
    if answer.trim().eq_ignore_ascii_case("yes") {
        Ok(())
    } else {
        Err(refused(action, format!("aborted: {action} not confirmed")))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// Scripted prompter for tests.
    pub(crate) struct FakePrompter {
        pub interactive: bool,
        pub answer: String,
        pub asked: Mutex<Vec<String>>,
    }

    impl FakePrompter {
        pub(crate) fn new(interactive: bool, answer: &str) -> Self {
            Self {
                interactive,
                answer: answer.to_string(),
                asked: Mutex::new(Vec::new()),
            }
        }
    }

    impl Prompter for FakePrompter {
        fn is_interactive(&self) -> bool {
            self.interactive
        }

        fn ask(&self, prompt: &str) -> std::io::Result<String> {
            self.asked.lock().unwrap().push(prompt.to_string());
            Ok(self.answer.clone())
        }
    }

    #[test]
    fn test_force_skips_prompt() {
        let p = FakePrompter::new(false, "");
        assert!(confirm("destroy sandbox 9001", true, true, &p).is_ok());
        assert!(p.asked.lock().unwrap().is_empty());
    }

    #[test]
    fn test_non_tty_refuses_with_hint() {
        let p = FakePrompter::new(false, "yes");
        let err = confirm("destroy sandbox 9001", false, false, &p).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfirmationRefused);
        assert_eq!(err.hints, vec!["re-run with --force to destroy sandbox 9001"]);
    }

    #[test]
    fn test_prompt_accepts_only_yes() {
        let p = FakePrompter::new(true, " YES \n");
        assert!(confirm("stop all sandboxes", false, false, &p).is_ok());
        assert_eq!(
            p.asked.lock().unwrap()[0],
            "Confirm stop all sandboxes? Type 'yes' to continue: "
        );

        for answer in ["y", "no", "", "yess"] {
            let p = FakePrompter::new(true, answer);
            assert!(confirm("stop all sandboxes", false, false, &p).is_err());
        }
    }

    proptest! {
        #[test]
        fn prop_json_mode_always_refuses(interactive in any::<bool>(), answer in "(yes|YES|no|)") {
            let p = FakePrompter::new(interactive, &answer);
            let err = confirm("expose sandbox 9001 port 8080", false, true, &p).unwrap_err();
            prop_assert_eq!(err.kind, ErrorKind::ConfirmationRefused);
            prop_assert!(err.hints[0].contains("--force"));
            prop_assert!(p.asked.lock().unwrap().is_empty());
        }
    }
}
