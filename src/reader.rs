use std::{
    io::{self, Read, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use serialport::SerialPort;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Sent once per cycle in [`ReadMode::Poll`] to ask the device for a frame.
pub const REQUEST_TOKEN: &[u8] = b"getPacket\r";

/// Delay between request/poll cycles in [`ReadMode::Poll`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Back-off used in [`ReadMode::Stream`] when nothing is waiting.
pub const IDLE_BACKOFF: Duration = Duration::from_millis(2);

/// Depth of the reader to UI channel.
pub const CHANNEL_CAPACITY: usize = 64;

/// Byte transport owned by the reader thread.
pub trait Link: Send {
    /// Number of bytes that can be read without blocking.
    fn available(&mut self) -> io::Result<usize>;

    /// Read exactly `len` bytes.
    fn read_chunk(&mut self, len: usize) -> io::Result<Vec<u8>>;

    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl Link for Box<dyn SerialPort> {
    fn available(&mut self) -> io::Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }

    fn read_chunk(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; len];
        Read::read_exact(self, &mut buf)?;
        Ok(buf)
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(self, bytes)?;
        Write::flush(self)
    }
}

/// How the reader talks to the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReadMode {
    /// The device pushes frames on its own
    #[default]
    Stream,
    /// Ask for every frame with `getPacket` at a fixed cadence
    Poll,
}

/// Messages from the reader thread to the UI thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// Raw bytes, exactly as read from the port
    Data(Vec<u8>),
    /// The reader has stopped and released the port. Always the last event.
    Disconnected,
}

pub type EventSender = mpsc::Sender<ReaderEvent>;
pub type EventReceiver = mpsc::Receiver<ReaderEvent>;

/// Create the bounded channel a reader reports into.
#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(CHANNEL_CAPACITY)
}

/// Handle on the background thread that owns the serial link.
#[derive(Debug)]
pub struct SerialReader {
    abort: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SerialReader {
    /// Move `link` onto a new thread and start forwarding its bytes.
    pub fn spawn(link: Box<dyn Link>, mode: ReadMode, events: EventSender) -> io::Result<Self> {
        let abort = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&abort);

        let handle = thread::Builder::new()
            .name("serial-reader".into())
            .spawn(move || read_loop(link, mode, &flag, &events))?;

        Ok(Self {
            abort,
            handle: Some(handle),
        })
    }

    /// Ask the thread to stop. It notices within one poll interval.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the thread to exit.
    ///
    /// The thread may be parked on a full channel, so the receiver should
    /// be drained or dropped first.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("Serial reader thread panicked");
        }
    }
}

impl Drop for SerialReader {
    fn drop(&mut self) {
        self.abort();
    }
}

#[instrument(skip_all)]
fn read_loop(mut link: Box<dyn Link>, mode: ReadMode, abort: &AtomicBool, events: &EventSender) {
    info!("Serial reader started ({mode:?})");

    while !abort.load(Ordering::Acquire) {
        let chunk = match poll_once(link.as_mut(), mode) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Serial I/O failed: {e}");
                abort.store(true, Ordering::Release);
                break;
            }
        };

        let idle = chunk.is_none();
        if let Some(chunk) = chunk {
            debug!("Read {} bytes", chunk.len());
            if events.blocking_send(ReaderEvent::Data(chunk)).is_err() {
                info!("Receiver dropped, stopping");
                break;
            }
        }

        match mode {
            ReadMode::Poll => thread::sleep(POLL_INTERVAL),
            ReadMode::Stream if idle => thread::sleep(IDLE_BACKOFF),
            ReadMode::Stream => (),
        }
    }

    // Release the port before anyone hears about it
    drop(link);

    let _ = events.blocking_send(ReaderEvent::Disconnected);
    info!("Serial reader stopped");
}

fn poll_once(link: &mut dyn Link, mode: ReadMode) -> io::Result<Option<Vec<u8>>> {
    if mode == ReadMode::Poll {
        link.send(REQUEST_TOKEN)?;
    }

    match link.available()? {
        0 => Ok(None),
        n => link.read_chunk(n).map(Some),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{
        collections::VecDeque,
        sync::Mutex,
        time::Instant,
    };

    /// In-memory link. Hands out one queued chunk per poll, records writes,
    /// and fails once the script says so.
    #[derive(Clone, Default)]
    pub(crate) struct MockLink {
        pub incoming: Arc<Mutex<VecDeque<Vec<u8>>>>,
        pub written: Arc<Mutex<Vec<u8>>>,
        pub fail_when_empty: bool,
    }

    impl MockLink {
        pub(crate) fn with_chunks(chunks: &[&[u8]]) -> Self {
            let link = Self::default();
            link.incoming
                .lock()
                .unwrap()
                .extend(chunks.iter().map(|c| c.to_vec()));
            link
        }
    }

    impl Link for MockLink {
        fn available(&mut self) -> io::Result<usize> {
            match self.incoming.lock().unwrap().front() {
                Some(chunk) => Ok(chunk.len()),
                None if self.fail_when_empty => Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
                None => Ok(0),
            }
        }

        fn read_chunk(&mut self, len: usize) -> io::Result<Vec<u8>> {
            let chunk = self.incoming.lock().unwrap().pop_front().unwrap_or_default();
            assert_eq!(chunk.len(), len);
            Ok(chunk)
        }

        fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.written.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }
    }

    fn collect_events(mut rx: EventReceiver) -> Vec<ReaderEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.blocking_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn abort_without_data_disconnects_once() {
        let (tx, rx) = event_channel();
        let reader = SerialReader::spawn(Box::new(MockLink::default()), ReadMode::Stream, tx).unwrap();

        thread::sleep(Duration::from_millis(20));
        reader.abort();
        reader.join();

        assert_eq!(collect_events(rx), [ReaderEvent::Disconnected]);
    }

    #[test]
    fn io_failure_ends_session() {
        let link = MockLink {
            fail_when_empty: true,
            ..MockLink::with_chunks(&[b"pitch=1,", b"roll=2,yaw=3\r\n"])
        };
        let (tx, rx) = event_channel();
        let reader = SerialReader::spawn(Box::new(link), ReadMode::Stream, tx).unwrap();

        let events = collect_events(rx);
        assert!(reader.is_aborted());
        reader.join();

        assert_eq!(
            events,
            [
                ReaderEvent::Data(b"pitch=1,".to_vec()),
                ReaderEvent::Data(b"roll=2,yaw=3\r\n".to_vec()),
                ReaderEvent::Disconnected,
            ]
        );
    }

    #[test]
    fn poll_mode_requests_each_frame() {
        let link = MockLink::with_chunks(&[b"a=1,b=2,c=3\r\n"]);
        let written = Arc::clone(&link.written);
        let (tx, mut rx) = event_channel();

        let started = Instant::now();
        let reader = SerialReader::spawn(Box::new(link), ReadMode::Poll, tx).unwrap();

        assert_eq!(rx.blocking_recv(), Some(ReaderEvent::Data(b"a=1,b=2,c=3\r\n".to_vec())));

        // Let a few more request cycles go by
        thread::sleep(POLL_INTERVAL * 3);
        reader.abort();
        assert_eq!(collect_events(rx), [ReaderEvent::Disconnected]);
        reader.join();

        let written = written.lock().unwrap();
        let requests = written.len() / REQUEST_TOKEN.len();
        assert!(requests >= 2, "only {requests} requests");
        assert!(written.starts_with(REQUEST_TOKEN));
        assert_eq!(written.len() % REQUEST_TOKEN.len(), 0);

        // Cadence is bounded by the poll interval
        let max_requests = started.elapsed().as_millis() / POLL_INTERVAL.as_millis() + 1;
        assert!(requests as u128 <= max_requests);
    }

    #[test]
    fn dropped_receiver_stops_reader() {
        let link = MockLink::with_chunks(&[b"x"]);
        let (tx, rx) = event_channel();
        drop(rx);

        let reader = SerialReader::spawn(Box::new(link), ReadMode::Stream, tx).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(reader.is_finished());
        reader.join();
    }
}
