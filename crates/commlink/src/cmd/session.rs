//! Pieces shared by the subcommands that hold a live endpoint.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use commlink_endpoint::{Connection, Endpoint, Events, FrameEvent, Framing};
use commlink_frame::FrameMode;

use crate::cmd::{ExchangeArgs, FramingArgs};
use crate::exit::{endpoint_error, io_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_frame, OutputFormat};

const POLL: Duration = Duration::from_millis(100);

/// Frames received on the endpoint's receive thread, handed over to the
/// command's main thread for printing.
pub struct Inbox {
    frames: Mutex<Receiver<FrameEvent>>,
}

impl Inbox {
    /// Subscribe to `events`. With `completes` set, every frame completes a
    /// pending synchronous exchange.
    pub fn subscribe(events: &Events, completes: bool) -> Self {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        events.on_frame(move |event| {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(event.clone());
            }
            completes
        });
        Self {
            frames: Mutex::new(rx),
        }
    }

    /// Print frames that already arrived. Returns how many were printed.
    pub fn drain(&self, format: OutputFormat) -> usize {
        let Ok(frames) = self.frames.lock() else {
            return 0;
        };
        let mut printed = 0;
        while let Ok(event) = frames.try_recv() {
            print_frame(&event, format);
            printed += 1;
        }
        printed
    }

    /// Print frames until `count` is reached or `running` drops.
    pub fn run(
        &self,
        running: &AtomicBool,
        count: Option<usize>,
        mut printed: usize,
        format: OutputFormat,
        mut on_frame: impl FnMut(&FrameEvent),
    ) -> usize {
        let Ok(frames) = self.frames.lock() else {
            return printed;
        };
        while running.load(Ordering::SeqCst) {
            if count.is_some_and(|count| printed >= count) {
                break;
            }
            match frames.recv_timeout(POLL) {
                Ok(event) => {
                    print_frame(&event, format);
                    on_frame(&event);
                    printed += 1;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        printed
    }
}

/// Send the requested payload on `link`, then keep printing frames if asked.
pub fn exchange<C: Connection>(
    link: &C,
    inbox: &Inbox,
    args: &ExchangeArgs,
    framing: &FramingArgs,
    running: &AtomicBool,
    format: OutputFormat,
) -> CliResult<i32> {
    let mut printed = 0;
    if let Some(payload) = resolve_payload(args, framing)? {
        if args.sync {
            let timeout = parse_duration(&args.timeout)?;
            link.send_sync(&payload, timeout)
                .map_err(|err| endpoint_error("exchange failed", err))?;
        } else {
            link.send(&payload)
                .map_err(|err| endpoint_error("send failed", err))?;
        }
        tracing::debug!(size = payload.len(), to = %link.identity(), "payload sent");
        printed = inbox.drain(format);
        if args.count.is_none() && !args.listen {
            return Ok(SUCCESS);
        }
    }

    inbox.run(running, args.count, printed, format, |_| {});
    Ok(SUCCESS)
}

/// Poll until the endpoint reports a connection. False on timeout or
/// interruption.
pub fn wait_connected(endpoint: &impl Endpoint, timeout: Duration, running: &AtomicBool) -> bool {
    let deadline = Instant::now() + timeout;
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        if endpoint.is_connected() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    endpoint.is_connected()
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

impl FramingArgs {
    pub fn framing(&self) -> Framing {
        Framing {
            terminator: self.terminator,
            buffer_size: self.buffer_size,
            mode: if self.accumulate {
                FrameMode::Accumulate
            } else {
                FrameMode::SingleRead
            },
        }
    }
}

fn resolve_payload(args: &ExchangeArgs, framing: &FramingArgs) -> CliResult<Option<Vec<u8>>> {
    let mut payload = if let Some(data) = &args.data {
        data.as_bytes().to_vec()
    } else if let Some(hex) = &args.hex {
        parse_hex(hex)?
    } else if let Some(path) = &args.file {
        fs::read(path).map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?
    } else {
        return Ok(None);
    };
    if args.terminate {
        payload.push(framing.terminator);
    }
    Ok(Some(payload))
}

/// Parse "01 03 0A", "01030a" or "0x01,0x03".
pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: String = input
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .map(|token| token.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CliError::new(USAGE, format!("invalid hex payload: {input}")));
    }
    if digits.len() % 2 != 0 {
        return Err(CliError::new(
            USAGE,
            format!("hex payload has an odd number of digits: {input}"),
        ));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| CliError::new(USAGE, format!("invalid hex payload: {input}")))
        })
        .collect()
}

/// clap value parser for a single byte: decimal or 0x-prefixed hex.
pub fn parse_byte(input: &str) -> Result<u8, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("not a byte value: {input}"))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
