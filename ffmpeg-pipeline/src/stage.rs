//! Send/receive protocol shared by decoders and encoders.
//!
//! A stage accepts one input at a time and hands back zero or more outputs.
//! `send` may answer [`Error::NotReady`]; the caller must then drain
//! output and resend the same input. The helpers here implement that
//! contract once so a "not ready" answer never leaks past a stage and an
//! input is never dropped on the floor.

use crate::error::{Error, Result};

pub trait CodecStage {
    type Input;
    type Output;

    /// Submit one input. `Err(Error::NotReady)` means "drain, then resend".
    fn send(&mut self, input: &mut Self::Input) -> Result<()>;

    /// Signal end of input. Calling it again after the first time is a no-op.
    fn send_eof(&mut self) -> Result<()>;

    /// Take one output, or `None` when more input is needed or the stage
    /// is fully flushed.
    fn receive(&mut self) -> Result<Option<Self::Output>>;

    fn stream_index(&self) -> usize;
}

/// Feed `input` to `stage`, delivering every output produced to `sink`.
pub fn push<S, F>(stage: &mut S, input: &mut S::Input, mut sink: F) -> Result<usize>
where
    S: CodecStage,
    F: FnMut(S::Output) -> Result<()>,
{
    let mut delivered = 0;
    loop {
        match stage.send(input) {
            Ok(()) => break,
            Err(Error::NotReady) => {
                let drained = drain(stage, &mut sink)?;
                if drained == 0 {
                    return Err(Error::Stalled {
                        stream_index: stage.stream_index(),
                    });
                }
                log::trace!(
                    "stream {}: drained {} outputs before resending",
                    stage.stream_index(),
                    drained
                );
                delivered += drained;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(delivered + drain(stage, &mut sink)?)
}

/// Receive until the stage has nothing more to give.
pub fn drain<S, F>(stage: &mut S, mut sink: F) -> Result<usize>
where
    S: CodecStage,
    F: FnMut(S::Output) -> Result<()>,
{
    let mut count = 0;
    while let Some(output) = stage.receive()? {
        count += 1;
        sink(output)?;
    }
    Ok(count)
}

/// Signal end of input and drain every buffered output.
pub fn flush<S, F>(stage: &mut S, sink: F) -> Result<usize>
where
    S: CodecStage,
    F: FnMut(S::Output) -> Result<()>,
{
    stage.send_eof()?;
    drain(stage, sink)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Echoes inputs back. Holds `delay` inputs until end of input and
    /// refuses new input while `capacity` outputs are waiting.
    struct FakeStage {
        capacity: usize,
        delay: usize,
        held: VecDeque<u32>,
        pending: VecDeque<u32>,
        eof: bool,
        send_calls: usize,
        refuse_forever: bool,
    }

    impl FakeStage {
        fn new(capacity: usize, delay: usize) -> Self {
            Self {
                capacity,
                delay,
                held: VecDeque::new(),
                pending: VecDeque::new(),
                eof: false,
                send_calls: 0,
                refuse_forever: false,
            }
        }
    }

    impl CodecStage for FakeStage {
        type Input = u32;
        type Output = u32;

        fn send(&mut self, input: &mut u32) -> Result<()> {
            self.send_calls += 1;
            if self.eof {
                return Err(Error::EndOfStream);
            }
            if self.refuse_forever || self.pending.len() >= self.capacity {
                return Err(Error::NotReady);
            }
            self.held.push_back(*input);
            while self.held.len() > self.delay {
                let item = self.held.pop_front().unwrap();
                self.pending.push_back(item);
            }
            Ok(())
        }

        fn send_eof(&mut self) -> Result<()> {
            self.eof = true;
            Ok(())
        }

        fn receive(&mut self) -> Result<Option<u32>> {
            if let Some(item) = self.pending.pop_front() {
                return Ok(Some(item));
            }
            if self.eof {
                return Ok(self.held.pop_front());
            }
            Ok(None)
        }

        fn stream_index(&self) -> usize {
            3
        }
    }

    #[test]
    fn test_not_ready_is_resolved_by_drain_and_resend() {
        // output left over from an earlier send fills the stage
        let mut stage = FakeStage::new(1, 0);
        stage.pending.push_back(0);

        let mut out = Vec::new();
        for i in 1..=5u32 {
            let mut input = i;
            push(&mut stage, &mut input, |o| {
                out.push(o);
                Ok(())
            })
            .unwrap();
        }
        flush(&mut stage, |o| {
            out.push(o);
            Ok(())
        })
        .unwrap();

        assert_eq!(out, vec![0, 1, 2, 3, 4, 5]);
        // the first input was refused once and resent
        assert_eq!(stage.send_calls, 6);
    }

    #[test]
    fn test_stage_that_never_accepts_reports_stall() {
        let mut stage = FakeStage::new(4, 0);
        stage.refuse_forever = true;
        let mut input = 1;
        let err = push(&mut stage, &mut input, |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::Stalled { stream_index: 3 }));
    }

    #[test]
    fn test_flush_is_idempotent() {
        let mut stage = FakeStage::new(8, 2);
        let mut seen = 0;
        for i in 0..3u32 {
            let mut input = i;
            seen += push(&mut stage, &mut input, |_| Ok(())).unwrap();
        }
        assert_eq!(seen, 1);
        assert_eq!(flush(&mut stage, |_| Ok(())).unwrap(), 2);
        assert_eq!(flush(&mut stage, |_| Ok(())).unwrap(), 0);
        assert_eq!(flush(&mut stage, |_| Ok(())).unwrap(), 0);
    }

    #[test]
    fn test_sink_error_stops_draining() {
        let mut stage = FakeStage::new(8, 0);
        let mut input = 7;
        let err = push(&mut stage, &mut input, |_| Err(Error::Write("sink".into()))).unwrap_err();
        assert!(matches!(err, Error::Write(_)));
    }

    #[test]
    fn test_send_after_eof_is_end_of_stream() {
        let mut stage = FakeStage::new(8, 0);
        flush(&mut stage, |_| Ok(())).unwrap();
        let mut input = 1;
        let err = push(&mut stage, &mut input, |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::EndOfStream));
    }
}
