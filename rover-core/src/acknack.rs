//! Stop-and-wait request/response matching for motor-controller commands.
//!
//! Commands are best-effort until the firmware echoes them back in an `IAM`
//! (ACK) or `INM` (NACK) sentence. Matching is by content, the full
//! `(cmd, p1..p4)` tuple, so duplicate or late replies are harmless: once a
//! pending entry completes, stragglers find nothing to match.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{debug, trace};
use rover_proto::motor::{self, AckReply, CmdKey};
use rover_proto::ParamError;

use crate::dispatch::{FrameHandler, HandlerError};
use crate::link::{RxFrame, SerialLink};

/// Anything that can push a raw frame toward the device.
pub trait FrameSink: Send + Sync {
    /// Non-blocking; false when the frame was not accepted.
    fn send_frame(&self, frame: Vec<u8>) -> bool;
}

impl FrameSink for SerialLink {
    fn send_frame(&self, frame: Vec<u8>) -> bool {
        SerialLink::send_frame(self, frame)
    }
}

/// Outcome of one `send_and_wait`, including the retries it took.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AckOutcome {
    /// True only for a final ACK.
    pub ok: bool,
    /// True when the final attempt ran out of time (as opposed to a NACK).
    pub is_timeout: bool,
    /// Firmware input-quality error class from the final NACK, 0 otherwise.
    pub input_err: u8,
    /// Firmware command/parameter error class from the final NACK.
    pub cmd_err: u8,
    /// Monotonic send-to-reply time of the final attempt [ms].
    pub rtt_ms: f64,
    pub retries_done: u32,
}

impl AckOutcome {
    /// A quality NACK is worth retrying; a parameter NACK is not.
    fn retryable_nack(&self) -> bool {
        self.input_err != 0 && self.cmd_err == 0
    }
}

/// Matcher configuration.
#[derive(Debug, Clone, Copy)]
pub struct AckConfig {
    /// Minimum spacing between consecutive sends.
    pub min_interval: Duration,
    /// Per-attempt reply deadline.
    pub ack_timeout: Duration,
    /// Retries on quality NACK or timeout.
    pub retries: u32,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(10),
            ack_timeout: Duration::from_millis(20),
            retries: 2,
        }
    }
}

struct Reply {
    ok: bool,
    input_err: u8,
    cmd_err: u8,
    at: Instant,
}

struct Pending {
    key: CmdKey,
    reply: Option<Reply>,
}

struct Inner {
    pending: Mutex<Option<Pending>>,
    reply_cond: Condvar,
    last_send: Mutex<Option<Instant>>,
}

/// The matcher. Clone-cheap; handlers and callers share one state.
#[derive(Clone)]
pub struct AckNack {
    cfg: AckConfig,
    inner: Arc<Inner>,
}

impl AckNack {
    pub fn new(cfg: AckConfig) -> Self {
        Self {
            cfg,
            inner: Arc::new(Inner {
                pending: Mutex::new(None),
                reply_cond: Condvar::new(),
                last_send: Mutex::new(None),
            }),
        }
    }

    /// Dispatcher handler for `IAM`/`INM` sentences.
    pub fn reply_handler(&self) -> Box<dyn FrameHandler> {
        let inner = Arc::clone(&self.inner);
        Box::new(ReplyHandler { inner })
    }

    /// Blocks until the rate limiter grants a slot.
    fn await_slot(&self) {
        let mut last = self.inner.last_send.lock().unwrap();
        if let Some(prev) = *last {
            let since = prev.elapsed();
            if since < self.cfg.min_interval {
                std::thread::sleep(self.cfg.min_interval - since);
            }
        }
        *last = Some(Instant::now());
    }

    /// Sends `(cmd, p1..p4)` and blocks the caller until a matching reply
    /// or the retry budget is exhausted. At most one command is outstanding
    /// at a time per matcher.
    pub fn send_and_wait(
        &self,
        sink: &dyn FrameSink,
        cmd: u8,
        p1: u8,
        p2: u8,
        p3: u8,
        p4: u8,
    ) -> Result<AckOutcome, ParamError> {
        let frame = motor::command_frame(cmd, p1, p2, p3, p4)?;
        let key: CmdKey = (cmd, p1, p2, p3, p4);
        let mut retries_done = 0u32;
        // Error classes of the last NACK, kept so a success after retries
        // still reports why the retries happened.
        let mut last_input_err = 0u8;
        let mut last_cmd_err = 0u8;

        loop {
            self.await_slot();

            let sent = Instant::now();
            {
                let mut pending = self.inner.pending.lock().unwrap();
                *pending = Some(Pending { key, reply: None });
            }

            if !sink.send_frame(frame.to_vec()) {
                // Immediate transport failure; nothing to wait for.
                *self.inner.pending.lock().unwrap() = None;
                return Ok(AckOutcome {
                    ok: false,
                    is_timeout: false,
                    input_err: 0,
                    cmd_err: 0,
                    rtt_ms: 0.0,
                    retries_done,
                });
            }

            let reply = self.wait_for_reply(sent);
            match reply {
                None => {
                    retries_done += 1;
                    let outcome = AckOutcome {
                        ok: false,
                        is_timeout: true,
                        input_err: 0,
                        cmd_err: 0,
                        rtt_ms: sent.elapsed().as_secs_f64() * 1e3,
                        retries_done,
                    };
                    if retries_done > self.cfg.retries {
                        *self.inner.pending.lock().unwrap() = None;
                        debug!("acknack: cmd {cmd} timed out after {retries_done} attempts");
                        return Ok(outcome);
                    }
                },
                Some(reply) => {
                    if !reply.ok {
                        last_input_err = reply.input_err;
                        last_cmd_err = reply.cmd_err;
                    }
                    let outcome = AckOutcome {
                        ok: reply.ok,
                        is_timeout: false,
                        input_err: last_input_err,
                        cmd_err: last_cmd_err,
                        rtt_ms: reply.at.duration_since(sent).as_secs_f64() * 1e3,
                        retries_done,
                    };
                    if outcome.ok {
                        *self.inner.pending.lock().unwrap() = None;
                        return Ok(outcome);
                    }
                    if outcome.retryable_nack() && retries_done < self.cfg.retries {
                        retries_done += 1;
                        continue;
                    }
                    *self.inner.pending.lock().unwrap() = None;
                    return Ok(outcome);
                },
            }
        }
    }

    fn wait_for_reply(&self, sent: Instant) -> Option<Reply> {
        let deadline = sent + self.cfg.ack_timeout;
        let mut pending = self.inner.pending.lock().unwrap();
        loop {
            if let Some(slot) = pending.as_mut() {
                if let Some(reply) = slot.reply.take() {
                    return Some(reply);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .inner
                .reply_cond
                .wait_timeout(pending, deadline - now)
                .unwrap();
            pending = guard;
        }
    }

    fn complete(inner: &Inner, reply: &AckReply) {
        let mut pending = inner.pending.lock().unwrap();
        let Some(slot) = pending.as_mut() else {
            // Late or duplicate reply; nobody is waiting.
            trace!("acknack: unmatched reply for cmd {}", reply.cmd);
            return;
        };
        if slot.key != reply.key() {
            trace!(
                "acknack: reply key {:?} does not match pending {:?}",
                reply.key(),
                slot.key
            );
            return;
        }
        slot.reply = Some(Reply {
            ok: reply.is_ack,
            input_err: reply.input_err,
            cmd_err: reply.cmd_err,
            at: Instant::now(),
        });
        drop(pending);
        inner.reply_cond.notify_all();
    }
}

struct ReplyHandler {
    inner: Arc<Inner>,
}

impl FrameHandler for ReplyHandler {
    fn handle(&mut self, frame: &RxFrame) -> Result<(), HandlerError> {
        let sentence = motor::parse_sentence(&frame.raw)?;
        let reply = AckReply::from_sentence(&sentence)?;
        AckNack::complete(&self.inner, &reply);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;

    /// Records sent frames and injects scripted replies after a delay.
    struct ScriptedLink {
        sent: StdMutex<Vec<Vec<u8>>>,
        /// One script entry per send: (delay, reply sentence payload), or
        /// None to stay silent.
        script: StdMutex<Vec<Option<(Duration, String)>>>,
        matcher: AckNack,
    }

    impl FrameSink for ScriptedLink {
        fn send_frame(&self, frame: Vec<u8>) -> bool {
            self.sent.lock().unwrap().push(frame);
            let step = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    None
                } else {
                    script.remove(0)
                }
            };
            if let Some((delay, payload)) = step {
                let matcher = self.matcher.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    let raw = motor::sentence_frame(&payload);
                    let mut handler = matcher.reply_handler();
                    let _ = handler.handle(&RxFrame {
                        raw,
                        rx_time: Instant::now(),
                    });
                });
            }
            true
        }
    }

    fn cfg() -> AckConfig {
        AckConfig {
            min_interval: Duration::from_millis(5),
            ack_timeout: Duration::from_millis(40),
            retries: 2,
        }
    }

    #[test]
    fn immediate_ack_matches() {
        let matcher = AckNack::new(cfg());
        let link = ScriptedLink {
            sent: StdMutex::new(Vec::new()),
            script: StdMutex::new(vec![Some((
                Duration::from_millis(5),
                "IAM,50,10,20,30,40".into(),
            ))]),
            matcher: matcher.clone(),
        };

        let outcome = matcher.send_and_wait(&link, 50, 10, 20, 30, 40).unwrap();
        assert!(outcome.ok);
        assert!(!outcome.is_timeout);
        assert_eq!(outcome.retries_done, 0);
        assert!(outcome.rtt_ms >= 4.0, "rtt = {}", outcome.rtt_ms);
        assert!(outcome.rtt_ms < 40.0, "rtt = {}", outcome.rtt_ms);
        assert_eq!(link.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn quality_nacks_retry_then_succeed() {
        let matcher = AckNack::new(cfg());
        let nack = "INM,50,10,20,30,40,1,0".to_string();
        let link = ScriptedLink {
            sent: StdMutex::new(Vec::new()),
            script: StdMutex::new(vec![
                Some((Duration::from_millis(2), nack.clone())),
                Some((Duration::from_millis(2), nack)),
                Some((Duration::from_millis(2), "IAM,50,10,20,30,40".into())),
            ]),
            matcher: matcher.clone(),
        };

        let start = Instant::now();
        let outcome = matcher.send_and_wait(&link, 50, 10, 20, 30, 40).unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.retries_done, 2);
        assert_eq!(outcome.input_err, 1);
        assert_eq!(outcome.cmd_err, 0);
        assert_eq!(link.sent.lock().unwrap().len(), 3);
        // Three sends spaced by the rate limiter.
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn command_error_nack_is_final() {
        let matcher = AckNack::new(cfg());
        let link = ScriptedLink {
            sent: StdMutex::new(Vec::new()),
            script: StdMutex::new(vec![Some((
                Duration::from_millis(2),
                "INM,50,10,20,30,40,0,3".into(),
            ))]),
            matcher: matcher.clone(),
        };

        let outcome = matcher.send_and_wait(&link, 50, 10, 20, 30, 40).unwrap();
        assert!(!outcome.ok);
        assert!(!outcome.is_timeout);
        assert_eq!(outcome.cmd_err, 3);
        assert_eq!(outcome.retries_done, 0);
        assert_eq!(link.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn timeouts_exhaust_retries() {
        let matcher = AckNack::new(cfg());
        let link = ScriptedLink {
            sent: StdMutex::new(Vec::new()),
            script: StdMutex::new(vec![None, None, None]),
            matcher: matcher.clone(),
        };

        let outcome = matcher.send_and_wait(&link, 4, 125, 125, 50, 50).unwrap();
        assert!(!outcome.ok);
        assert!(outcome.is_timeout);
        assert_eq!(outcome.retries_done, 3);
        assert_eq!(link.sent.lock().unwrap().len(), 3);
    }

    #[test]
    fn mismatched_reply_is_ignored() {
        let matcher = AckNack::new(cfg());
        let link = ScriptedLink {
            sent: StdMutex::new(Vec::new()),
            // Reply echoes different parameters: content matching must not
            // accept it, so the attempt times out.
            script: StdMutex::new(vec![
                Some((Duration::from_millis(2), "IAM,50,11,20,30,40".into())),
                None,
                None,
            ]),
            matcher: matcher.clone(),
        };

        let outcome = matcher.send_and_wait(&link, 50, 10, 20, 30, 40).unwrap();
        assert!(outcome.is_timeout);
    }

    #[test]
    fn bad_parameter_is_rejected_before_sending() {
        let matcher = AckNack::new(cfg());
        let link = ScriptedLink {
            sent: StdMutex::new(Vec::new()),
            script: StdMutex::new(Vec::new()),
            matcher: matcher.clone(),
        };
        assert!(matcher.send_and_wait(&link, 255, 0, 0, 0, 0).is_err());
        assert!(link.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn rate_limiter_spaces_sends() {
        let matcher = AckNack::new(AckConfig {
            min_interval: Duration::from_millis(20),
            ack_timeout: Duration::from_millis(10),
            retries: 0,
        });
        let link = ScriptedLink {
            sent: StdMutex::new(Vec::new()),
            script: StdMutex::new(vec![
                Some((Duration::from_millis(1), "IAM,2,125,125,125,125".into())),
                Some((Duration::from_millis(1), "IAM,2,125,125,125,125".into())),
            ]),
            matcher: matcher.clone(),
        };

        let start = Instant::now();
        matcher.send_and_wait(&link, 2, 125, 125, 125, 125).unwrap();
        matcher.send_and_wait(&link, 2, 125, 125, 125, 125).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn late_reply_after_completion_is_harmless() {
        let matcher = AckNack::new(cfg());
        // Complete with no pending entry: must be a no-op.
        let reply = AckReply {
            is_ack: true,
            cmd: 1,
            p1: 0,
            p2: 0,
            p3: 0,
            p4: 0,
            input_err: 0,
            cmd_err: 0,
        };
        AckNack::complete(&matcher.inner, &reply);
    }
}
