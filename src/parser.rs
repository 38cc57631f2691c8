use std::collections::VecDeque;

use crate::{
    Channels, Orientation, TelemetryRecord,
    utils::{scale, unscale},
};

/// Every frame on the wire ends with this sequence.
pub const TERMINATOR: &[u8] = b"\r\n";

/// Longest unterminated command kept before it is thrown away as garbage.
pub const MAX_COMMAND_LEN: usize = 1024;

/// Which flavour of telemetry line the device sends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ProtocolVariant {
    /// `pitch=..,roll=..,yaw=..`
    #[default]
    Basic,
    /// Orientation followed by throttle, pitch, yaw and roll stick channels
    Extended,
}

impl ProtocolVariant {
    /// Number of tokens a frame splits into on `=` and `,`.
    #[must_use]
    pub const fn field_count(self) -> usize {
        match self {
            Self::Basic => 6,
            Self::Extended => 14,
        }
    }

    const fn labels(self) -> &'static [&'static str] {
        match self {
            Self::Basic => &["pitch", "roll", "yaw"],
            Self::Extended => &["pitch", "roll", "yaw", "throttle", "chPitch", "chYaw", "chRoll"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErr {
    #[error("Bad Data: expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    #[error("Bad Data: field {index} is not an integer ({token:?})")]
    InvalidValue { index: usize, token: String },

    #[error("Bad Data: line longer than {MAX_COMMAND_LEN} bytes")]
    Overlong,
}

/// Consumer of the frames reassembled by a [`CommandAssembler`].
pub trait FrameSink {
    /// Sees every completed line, terminator removed, before it is decoded.
    fn on_line(&mut self, _line: &str) {}

    fn on_record(&mut self, record: TelemetryRecord);

    fn on_malformed(&mut self, line: &str, err: ParseErr);
}

/// Collects decode outcomes in arrival order.
impl FrameSink for Vec<Result<TelemetryRecord, ParseErr>> {
    fn on_record(&mut self, record: TelemetryRecord) {
        self.push(Ok(record));
    }

    fn on_malformed(&mut self, _line: &str, err: ParseErr) {
        self.push(Err(err));
    }
}

/// Reassembles raw serial chunks into `\r\n` terminated commands.
///
/// Every completed command is decoded and handed to the sink straight
/// away, so between calls to [`feed`](Self::feed) at most one entry is
/// pending and it never holds a terminator. A command longer than
/// [`MAX_COMMAND_LEN`] is reported once as [`ParseErr::Overlong`] and
/// skipped up to its terminator, however it was split into chunks.
#[derive(Debug, Default)]
pub struct CommandAssembler {
    variant: ProtocolVariant,
    pending: VecDeque<Vec<u8>>,
    /// Set while skipping the tail of an overlong command
    discarding: bool,
}

impl CommandAssembler {
    #[must_use]
    pub fn new(variant: ProtocolVariant) -> Self {
        Self {
            variant,
            pending: VecDeque::new(),
            discarding: false,
        }
    }

    #[must_use]
    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    /// Number of bytes waiting for a terminator.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.pending.iter().map(Vec::len).sum()
    }

    /// Forget any partial command, e.g. when a new session starts.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }

    pub fn feed<S: FrameSink>(&mut self, chunk: &[u8], sink: &mut S) {
        if chunk.is_empty() {
            return;
        }

        match self.pending.back_mut() {
            Some(newest) if find_terminator(newest).is_none() => newest.extend_from_slice(chunk),
            _ => self.pending.push_back(chunk.to_vec()),
        }

        loop {
            if self.discarding && !self.skip_overlong() {
                break;
            }

            let Some(command) = self.next_command() else {
                break;
            };

            if command.len() > MAX_COMMAND_LEN {
                report_overlong(&command, sink);
                continue;
            }

            let line = String::from_utf8_lossy(&command);
            sink.on_line(&line);

            match decode(&line, self.variant) {
                Ok(record) => sink.on_record(record),
                Err(e) => sink.on_malformed(&line, e),
            }
        }

        if !self.discarding
            && let Some(newest) = self.pending.back()
            && unterminated_len(newest) > MAX_COMMAND_LEN
        {
            report_overlong(newest, sink);
            self.discarding = true;
            self.skip_overlong();
        }
    }

    /// Pop the oldest completed command, without its terminator. Anything
    /// after the terminator stays at the front of the queue.
    fn next_command(&mut self) -> Option<Vec<u8>> {
        let oldest = self.pending.front_mut()?;
        let end = find_terminator(oldest)?;

        let rest = oldest.split_off(end + TERMINATOR.len());
        let mut command = self.pending.pop_front()?;
        command.truncate(end);

        if !rest.is_empty() {
            self.pending.push_front(rest);
        }

        Some(command)
    }

    /// Drop the rest of an overlong command. Returns true once its
    /// terminator has been consumed.
    fn skip_overlong(&mut self) -> bool {
        let Some(oldest) = self.pending.front_mut() else {
            return false;
        };

        let done = match find_terminator(oldest) {
            Some(end) => {
                oldest.drain(..end + TERMINATOR.len());
                self.discarding = false;
                true
            }
            None => {
                // A trailing '\r' may pair with a '\n' in the next chunk
                let keep = usize::from(oldest.last() == Some(&b'\r'));
                let stale = oldest.len() - keep;
                oldest.drain(..stale);
                false
            }
        };

        if oldest.is_empty() {
            self.pending.pop_front();
        }
        done
    }
}

/// Length of a partial command, not counting a '\r' that may turn out to
/// be half of the terminator.
fn unterminated_len(buf: &[u8]) -> usize {
    buf.len() - usize::from(buf.ends_with(b"\r"))
}

fn report_overlong<S: FrameSink>(command: &[u8], sink: &mut S) {
    let head = &command[..command.len().min(MAX_COMMAND_LEN)];
    sink.on_malformed(&String::from_utf8_lossy(head), ParseErr::Overlong);
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(TERMINATOR.len()).position(|w| w == TERMINATOR)
}

/// Decode one command line into a record.
///
/// Carriage returns and spaces are ignored. The line is split on every `=`
/// and `,`; the odd tokens carry the values, scaled by
/// [`WIRE_SCALE`](crate::WIRE_SCALE). Pitch and roll of the orientation are
/// sign-inverted.
pub fn decode(line: &str, variant: ProtocolVariant) -> Result<TelemetryRecord, ParseErr> {
    let cleaned: String = line.chars().filter(|c| !matches!(c, '\r' | ' ')).collect();
    let tokens: Vec<&str> = cleaned.split(['=', ',']).collect();

    if tokens.len() != variant.field_count() {
        return Err(ParseErr::FieldCount {
            expected: variant.field_count(),
            actual: tokens.len(),
        });
    }

    let values = tokens
        .iter()
        .enumerate()
        .skip(1)
        .step_by(2)
        .map(|(index, token)| {
            token.parse::<i64>().map(unscale).map_err(|_| ParseErr::InvalidValue {
                index,
                token: (*token).to_owned(),
            })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    let orientation = Orientation {
        // Subtracting from zero keeps a wire 0 from turning into -0.0
        pitch: 0.0 - values[0],
        roll: 0.0 - values[1],
        yaw: values[2],
    };

    let channels = match variant {
        ProtocolVariant::Basic => None,
        ProtocolVariant::Extended => Some(Channels {
            throttle: values[3],
            pitch: values[4],
            yaw: values[5],
            roll: values[6],
        }),
    };

    Ok(TelemetryRecord { orientation, channels })
}

/// Build the wire line a device would send for `record`, terminator
/// included.
#[must_use]
pub fn encode(record: &TelemetryRecord, variant: ProtocolVariant) -> String {
    let o = record.orientation;
    let mut values = vec![scale(-o.pitch), scale(-o.roll), scale(o.yaw)];

    if variant == ProtocolVariant::Extended {
        let ch = record.channels.unwrap_or(Channels {
            throttle: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            roll: 0.0,
        });
        values.extend([ch.throttle, ch.pitch, ch.yaw, ch.roll].map(scale));
    }

    let body = variant
        .labels()
        .iter()
        .zip(values)
        .map(|(label, value)| format!("{label}={value}"))
        .collect::<Vec<_>>()
        .join(",");

    format!("{body}\r\n")
}
