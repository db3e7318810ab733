use async_trait::async_trait;
use em_api_types::BackendInfo;
use em_mint_core::AlertSink;
use em_session::{AuthorizationPrompt, WalletChooser};
use std::future::Future;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// Shared stdin: the command loop, the wallet chooser and the login prompt
/// all read lines from here.
pub(crate) struct Console {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl Console {
    pub(crate) fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    /// `None` on end of input.
    pub(crate) async fn read_line(&self) -> Option<String> {
        match self.lines.lock().await.next_line().await {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!("failed to read stdin: {err}");
                None
            }
        }
    }

    pub(crate) fn notice(&self, message: &str) {
        println!("! {message}");
    }
}

/// Runs `work` unless `interrupt` resolves first, in which case `work` is
/// dropped and `None` is returned.
pub(crate) async fn interruptible<T, I>(work: impl Future<Output = T>, interrupt: I) -> Option<T>
where
    I: Future,
{
    tokio::select! {
        output = work => Some(output),
        _ = interrupt => None,
    }
}

#[async_trait]
impl WalletChooser for Console {
    async fn choose(&self, options: &[BackendInfo]) -> Option<String> {
        println!("Choose a wallet (empty line to cancel):");
        for (index, option) in options.iter().enumerate() {
            println!("  {}) {} - {}", index + 1, option.name, option.description);
        }
        let answer = self.read_line().await?;
        pick(options, answer.trim())
    }
}

fn pick(options: &[BackendInfo], answer: &str) -> Option<String> {
    if answer.is_empty() {
        return None;
    }
    if let Ok(index) = answer.parse::<usize>() {
        return options.get(index.checked_sub(1)?).map(|option| option.id.clone());
    }
    options
        .iter()
        .find(|option| option.id == answer || option.name.eq_ignore_ascii_case(answer))
        .map(|option| option.id.clone())
}

#[async_trait]
impl AuthorizationPrompt for Console {
    async fn authorize(&self, url: &str) -> Option<String> {
        println!("Open this link to log in:\n  {url}");
        println!("Paste the URL you were redirected to (empty line to cancel):");
        let answer = self.read_line().await?;
        let answer = answer.trim();
        (!answer.is_empty()).then(|| answer.to_owned())
    }
}

impl AlertSink for Console {
    fn alert(&self, message: &str) {
        self.notice(message);
    }
}
