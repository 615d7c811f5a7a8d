use std::io::{self, BufRead, Write};

use log::warn;

/// Decides whether the remote originals of converted files may be deleted.
pub trait Confirm {
    fn confirm_deletion(&mut self, count: usize) -> bool;
}

/// Asks on the terminal. Anything but `y` or `yes` declines.
pub struct StdinConfirm<R, W> {
    input: R,
    output: W,
}

impl StdinConfirm<io::StdinLock<'static>, io::Stdout> {
    pub fn new() -> Self {
        Self::with_io(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> StdinConfirm<R, W> {
    pub fn with_io(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn prompt(&mut self, count: usize) -> io::Result<()> {
        writeln!(
            self.output,
            "\n{} HEIC files have been successfully converted to JPG.",
            count
        )?;
        write!(
            self.output,
            "Do you want to delete the original HEIC files from Google Drive? (y/N): "
        )?;
        self.output.flush()
    }
}

impl<R: BufRead, W: Write> Confirm for StdinConfirm<R, W> {
    fn confirm_deletion(&mut self, count: usize) -> bool {
        if count == 0 {
            return false;
        }

        if let Err(err) = self.prompt(count) {
            warn!("Could not ask for deletion confirmation: {}", err);
            return false;
        }

        let mut answer = String::new();
        match self.input.read_line(&mut answer) {
            Ok(0) | Err(_) => false,
            Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        }
    }
}
