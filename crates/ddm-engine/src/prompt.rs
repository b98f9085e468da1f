//! Seam for the interactive yes/no confirmations, so tests can script
//! the operator's answers.

use std::io::BufRead;

pub trait Prompter {
    /// Print `question` and return the operator's yes/no answer.
    fn confirm(&mut self, question: &str) -> bool;
}

/// Interactive prompter: reads stdin until a line starting with y or n
/// (case-insensitive). EOF counts as no.
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&mut self, question: &str) -> bool {
        println!("{question}");
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return false,
                Ok(_) => {}
            }
            match line.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
                Some('y') => return true,
                Some('n') => return false,
                _ => continue,
            }
        }
    }
}
