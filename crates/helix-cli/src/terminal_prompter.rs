//! Interactive confirmation prompter, grounded in the teacher's onboarding
//! wizard (`moltis-onboarding::wizard::run_onboarding`): plain
//! `std::io::stdin()`/`read_line`, no TUI or prompt crate — the workspace
//! carries none, and this keeps the same idiom the rest of the pack uses
//! for interactive input.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use helix_common::Result;
use helix_confirm::{Choice, PromptRequest, PromptResponse, Prompter};

pub struct TerminalPrompter;

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn prompt(&self, request: PromptRequest) -> Result<PromptResponse> {
        println!();
        println!("[{:?}] {} wants to run:", request.level, request.tool_name);
        println!("  {}", request.operation.description);
        if let Some(preview) = &request.preview {
            println!("  preview: {preview}");
        }
        for danger in &request.assessment_dangers {
            println!("  ! {danger}");
        }
        print!("Allow? [y]es / [n]o / [a]lways / [x]never / [d]eny > ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;

        let choice = match line.trim().to_lowercase().as_str() {
            "y" | "yes" => Choice::Allow,
            "a" | "always" => Choice::Always,
            "x" | "never" => Choice::Never,
            "" | "n" | "no" | "d" | "deny" => Choice::Deny,
            other => {
                println!("unrecognized answer {other:?}, treating as deny");
                Choice::Deny
            },
        };

        Ok(PromptResponse { choice })
    }
}
