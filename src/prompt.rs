use std::collections::VecDeque;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Yes/no question put to the operator. Awaiting an answer never blocks the runtime,
/// so a pending prompt can be dropped when the run is interrupted.
#[allow(async_fn_in_trait)] // Single-task use, no Send bound needed
pub trait Confirm {
    async fn confirm(&mut self, prompt: &str, default: bool) -> io::Result<bool>;
}

/// Asks on a line-oriented terminal; an empty answer takes the default
pub struct LineConfirm<R, W> {
    input: R,
    output: W,
}

impl<R, W> LineConfirm<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R, W> Confirm for LineConfirm<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn confirm(&mut self, prompt: &str, default: bool) -> io::Result<bool> {
        let mut answer = String::new();

        loop {
            answer.clear();

            let hint = if default { "[Y/n]" } else { "[y/N]" };
            self.output
                .write_all(format!("{prompt} {hint}: ").as_bytes())
                .await?;
            self.output.flush().await?;

            // Closed input behaves like pressing enter
            if self.input.read_line(&mut answer).await? == 0 {
                return Ok(default);
            }

            match answer.trim().to_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => continue,
            }
        }
    }
}

pub type StdinConfirm = LineConfirm<BufReader<tokio::io::Stdin>, tokio::io::Stdout>;

pub fn stdin_confirm() -> StdinConfirm {
    LineConfirm::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
}

/// Replays prepared answers, then falls back to a fixed one.
/// Used for `--yes` and for tests.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConfirm {
    answers: VecDeque<bool>,
    fallback: bool,
    asked: Vec<String>,
}

impl ScriptedConfirm {
    pub fn always(answer: bool) -> Self {
        Self {
            answers: VecDeque::new(),
            fallback: answer,
            asked: Vec::new(),
        }
    }

    pub fn answers(answers: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            fallback,
            asked: Vec::new(),
        }
    }

    /// Prompts seen so far
    pub fn asked(&self) -> &[String] {
        &self.asked
    }
}

impl Confirm for ScriptedConfirm {
    async fn confirm(&mut self, prompt: &str, _default: bool) -> io::Result<bool> {
        self.asked.push(prompt.to_string());
        Ok(self.answers.pop_front().unwrap_or(self.fallback))
    }
}

/// The operator as chosen on the command line
pub enum Operator {
    Terminal(StdinConfirm),
    AssumeYes(ScriptedConfirm),
}

impl Operator {
    pub fn new(assume_yes: bool) -> Self {
        if assume_yes {
            Operator::AssumeYes(ScriptedConfirm::always(true))
        } else {
            Operator::Terminal(stdin_confirm())
        }
    }
}

impl Confirm for Operator {
    async fn confirm(&mut self, prompt: &str, default: bool) -> io::Result<bool> {
        match self {
            Operator::Terminal(terminal) => terminal.confirm(prompt, default).await,
            Operator::AssumeYes(scripted) => scripted.confirm(prompt, default).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn ask(input: &str, default: bool) -> (bool, String) {
        let mut output = Vec::new();
        let answer = LineConfirm::new(input.as_bytes(), &mut output)
            .confirm("Proceed?", default)
            .await
            .unwrap();
        (answer, String::from_utf8(output).unwrap())
    }

    #[tokio::test]
    async fn test_line_confirm_answers() {
        assert!(ask("y\n", false).await.0);
        assert!(ask("YES\n", false).await.0);
        assert!(!ask("n\n", true).await.0);
        assert!(ask("\n", true).await.0);
        assert!(!ask("\n", false).await.0);
    }

    #[tokio::test]
    async fn test_line_confirm_reprompts_on_garbage() {
        let (answer, output) = ask("maybe\nno\n", true).await;
        assert!(!answer);
        assert_eq!(output.matches("Proceed? [Y/n]: ").count(), 2);
    }

    #[tokio::test]
    async fn test_line_confirm_eof_takes_default() {
        assert!(ask("", true).await.0);
        assert!(!ask("", false).await.0);
    }

    #[tokio::test]
    async fn test_unanswered_prompt_can_be_dropped() {
        // The writer half stays open, so the prompt waits for a line that never comes
        let (reader, _writer) = tokio::io::duplex(64);
        let mut confirm = LineConfirm::new(BufReader::new(reader), tokio::io::sink());

        let answered = tokio::select! {
            answer = confirm.confirm("Proceed?", false) => Some(answer),
            _ = tokio::time::sleep(Duration::from_millis(50)) => None,
        };
        assert!(answered.is_none());
    }

    #[tokio::test]
    async fn test_scripted_confirm() {
        let mut confirm = ScriptedConfirm::answers([false], true);
        assert!(!confirm.confirm("first", true).await.unwrap());
        assert!(confirm.confirm("second", false).await.unwrap());
        assert_eq!(confirm.asked(), &["first".to_string(), "second".to_string()]);

        let mut always = ScriptedConfirm::always(false);
        assert!(!always.confirm("anything", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_assume_yes_operator() {
        let mut operator = Operator::new(true);
        assert!(operator.confirm("Proceed?", false).await.unwrap());
        assert!(matches!(operator, Operator::AssumeYes(_)));
    }
}
