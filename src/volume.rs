//! Continuation of a logical tape stream across physical volumes.
//!
//! When a read fails because the drive has run off the end of a reel, the operator is asked to
//! mount the next one, the drive is rewound, and the same read is issued again.  Any other read
//! failure is fatal.
//!
//! The retried read replaces the failed one exactly, which assumes MAGSAV never splits a record
//! across two reels.

use std::io::{BufRead, Write};

use log::{debug, warn};

use crate::{
    block::{BlockRead, BlockSource},
    error::{DecodeError, Result},
    tape::TapeControl,
};

/// The person at the console who swaps reels.
pub trait Operator {
    /// Asks for volume `volume` (counting from 1) to be mounted, and blocks until the operator
    /// confirms.  Returns [`DecodeError::OperatorAborted`] if the operator can't be reached.
    fn next_volume(&mut self, volume: usize) -> Result<()>;
}

/// An operator at a terminal: prompts on `output` and waits for a line on `input`.
#[derive(Debug)]
pub struct ConsoleOperator<I, O> {
    input: I,
    output: O,
}

impl<I: BufRead, O: Write> ConsoleOperator<I, O> {
    pub fn new(input: I, output: O) -> Self {
        Self { input, output }
    }
}

impl ConsoleOperator<std::io::StdinLock<'static>, std::io::Stdout> {
    /// Prompts on stdout and reads confirmation from stdin.
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<I: BufRead, O: Write> Operator for ConsoleOperator<I, O> {
    fn next_volume(&mut self, volume: usize) -> Result<()> {
        debug!("asking for volume {volume}");
        write!(self.output, "please mount next tape (hit return to continue): ")
            .and_then(|()| self.output.flush())
            .map_err(DecodeError::Console)?;

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => Err(DecodeError::OperatorAborted),
            Ok(_) => Ok(()),
            Err(e) => Err(DecodeError::Console(e)),
        }
    }
}

/// Wraps a tape so that end-of-tape read failures turn into an operator-confirmed volume swap.
#[derive(Debug)]
pub struct VolumeContinuation<T, O> {
    tape: T,
    operator: O,
    volume: usize,
}

impl<T: BlockSource + TapeControl, O: Operator> VolumeContinuation<T, O> {
    pub fn new(tape: T, operator: O) -> Self {
        Self {
            tape,
            operator,
            volume: 1,
        }
    }

    /// The volume currently mounted, counting from 1.
    pub fn volume(&self) -> usize {
        self.volume
    }

    pub fn into_inner(self) -> (T, O) {
        (self.tape, self.operator)
    }
}

impl<T: BlockSource + TapeControl, O: Operator> BlockSource for VolumeContinuation<T, O> {
    fn read_block(&mut self, buf: &mut [u8]) -> Result<BlockRead> {
        loop {
            let err = match self.tape.read_block(buf) {
                Ok(read) => return Ok(read),
                Err(DecodeError::Device(err)) => err,
                Err(other) => return Err(other),
            };

            if !self.tape.at_end_of_tape()? {
                return Err(DecodeError::Device(err));
            }

            warn!("end of tape on volume {}: {err}", self.volume);
            self.volume += 1;
            self.operator.next_volume(self.volume)?;
            self.tape.rewind()?;
            debug!("retrying read on volume {}", self.volume);
        }
    }
}
