//! Framed control channel between client library and service.
//!
//! One frame is a 16-byte header followed by exactly `payload_size` bytes,
//! with full-read/full-write discipline on both sides. A short read, a
//! closed peer, or any OS error surfaces as a receive failure; the service
//! treats that as client disconnect and goes back to accepting.
//!
//! Unix: a filesystem `AF_UNIX` stream socket at `/tmp/<name>.sock` with
//! owner-only permissions. Windows: a message-framed duplex named pipe at
//! `\\.\pipe\<name>`.

use std::time::Duration;

use bytes::BytesMut;

use crate::messages::{MessageHeader, MessageType, HEADER_SIZE};

#[cfg(unix)]
pub use self::posix::{ControlChannel, ControlListener};

#[cfg(windows)]
pub use self::win::{ControlChannel, ControlListener};

/// Poll interval while waiting for the service endpoint to appear.
const CONNECT_RETRY: Duration = Duration::from_millis(100);

fn encode_frame(message_type: MessageType, sequence: u32, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    MessageHeader::new(message_type, sequence, payload.len() as u32).encode(&mut buf);
    buf.extend_from_slice(payload);
    buf
}

#[cfg(unix)]
mod posix {
    use std::io::{Read, Write};
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    use tracing::debug;

    use super::{encode_frame, CONNECT_RETRY};
    use crate::messages::{MessageHeader, MessageType, HEADER_SIZE};
    use crate::{Error, Result};

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{name}.sock"))
    }

    /// Server end: owns the listening socket file.
    pub struct ControlListener {
        listener: UnixListener,
        path: PathBuf,
    }

    impl ControlListener {
        /// Bind the named endpoint, replacing any stale socket file, and
        /// restrict it to the owning user.
        pub fn bind(name: &str) -> Result<Self> {
            let path = socket_path(name);
            let _ = std::fs::remove_file(&path);
            let listener = UnixListener::bind(&path)?;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
            debug!(path = %path.display(), "control channel listening");
            Ok(Self { listener, path })
        }

        /// Block until the next client connects.
        pub fn accept(&self) -> Result<ControlChannel> {
            let (stream, _) = self.listener.accept()?;
            Ok(ControlChannel { stream })
        }
    }

    impl Drop for ControlListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    /// One connected control stream; used identically on both sides.
    pub struct ControlChannel {
        stream: UnixStream,
    }

    impl ControlChannel {
        /// Client end: connect to the named endpoint, retrying until the
        /// timeout elapses so a freshly started service can win the race.
        pub fn connect(name: &str, timeout: Duration) -> Result<Self> {
            let path = socket_path(name);
            let deadline = Instant::now() + timeout;
            loop {
                match UnixStream::connect(&path) {
                    Ok(stream) => return Ok(Self { stream }),
                    Err(_) if Instant::now() < deadline => std::thread::sleep(CONNECT_RETRY),
                    Err(_) => return Err(Error::ConnectTimeout(name.to_owned())),
                }
            }
        }

        /// Write one framed message: header then exactly the payload.
        pub fn send(
            &mut self,
            message_type: MessageType,
            sequence: u32,
            payload: &[u8],
        ) -> Result<()> {
            let frame = encode_frame(message_type, sequence, payload);
            self.stream.write_all(&frame)?;
            Ok(())
        }

        /// Read one framed message. Any short read is a disconnect.
        pub fn recv(&mut self) -> Result<(MessageHeader, Vec<u8>)> {
            let mut raw = [0u8; HEADER_SIZE];
            read_exact(&mut self.stream, &mut raw)?;
            let header = MessageHeader::decode(&raw)?;

            let mut payload = vec![0u8; header.payload_size as usize];
            read_exact(&mut self.stream, &mut payload)?;
            Ok((header, payload))
        }

        pub fn shutdown(&mut self) {
            let _ = self.stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn read_exact(stream: &mut UnixStream, buf: &mut [u8]) -> Result<()> {
        stream.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Disconnected
            } else {
                Error::Io(e)
            }
        })
    }
}

#[cfg(windows)]
mod win {
    use std::time::{Duration, Instant};

    use windows::core::HSTRING;
    use windows::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, ReadFile, WriteFile, FILE_GENERIC_READ, FILE_GENERIC_WRITE,
        FILE_SHARE_NONE, OPEN_EXISTING,
    };
    use windows::Win32::System::Pipes::{
        ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, PIPE_ACCESS_DUPLEX,
        PIPE_READMODE_BYTE, PIPE_TYPE_BYTE, PIPE_WAIT,
    };

    use super::{encode_frame, CONNECT_RETRY};
    use crate::messages::{MessageHeader, MessageType, HEADER_SIZE};
    use crate::{Error, Result};

    fn pipe_name(name: &str) -> HSTRING {
        HSTRING::from(format!(r"\\.\pipe\{name}"))
    }

    pub struct ControlListener {
        pipe: HANDLE,
    }

    impl ControlListener {
        pub fn bind(name: &str) -> Result<Self> {
            let pipe = unsafe {
                CreateNamedPipeW(
                    &pipe_name(name),
                    PIPE_ACCESS_DUPLEX,
                    PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT,
                    1,
                    64 * 1024,
                    64 * 1024,
                    0,
                    None,
                )
            };
            if pipe == INVALID_HANDLE_VALUE {
                return Err(Error::MapFailed("CreateNamedPipe failed".to_owned()));
            }
            Ok(Self { pipe })
        }

        pub fn accept(&self) -> Result<ControlChannel> {
            unsafe { ConnectNamedPipe(self.pipe, None) }
                .map_err(|e| Error::MapFailed(e.to_string()))?;
            Ok(ControlChannel {
                handle: self.pipe,
                owned: false,
            })
        }
    }

    impl Drop for ControlListener {
        fn drop(&mut self) {
            unsafe {
                let _ = DisconnectNamedPipe(self.pipe);
                let _ = CloseHandle(self.pipe);
            }
        }
    }

    pub struct ControlChannel {
        handle: HANDLE,
        owned: bool,
    }

    impl ControlChannel {
        pub fn connect(name: &str, timeout: Duration) -> Result<Self> {
            let deadline = Instant::now() + timeout;
            loop {
                let handle = unsafe {
                    CreateFileW(
                        &pipe_name(name),
                        FILE_GENERIC_READ.0 | FILE_GENERIC_WRITE.0,
                        FILE_SHARE_NONE,
                        None,
                        OPEN_EXISTING,
                        Default::default(),
                        HANDLE::default(),
                    )
                };
                match handle {
                    Ok(handle) => {
                        return Ok(Self {
                            handle,
                            owned: true,
                        })
                    }
                    Err(_) if Instant::now() < deadline => std::thread::sleep(CONNECT_RETRY),
                    Err(_) => return Err(Error::ConnectTimeout(name.to_owned())),
                }
            }
        }

        pub fn send(
            &mut self,
            message_type: MessageType,
            sequence: u32,
            payload: &[u8],
        ) -> Result<()> {
            let frame = encode_frame(message_type, sequence, payload);
            self.write_all(&frame)
        }

        pub fn recv(&mut self) -> Result<(MessageHeader, Vec<u8>)> {
            let mut raw = [0u8; HEADER_SIZE];
            self.read_all(&mut raw)?;
            let header = MessageHeader::decode(&raw)?;

            let mut payload = vec![0u8; header.payload_size as usize];
            self.read_all(&mut payload)?;
            Ok((header, payload))
        }

        pub fn shutdown(&mut self) {
            unsafe {
                let _ = DisconnectNamedPipe(self.handle);
            }
        }

        fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
            while !buf.is_empty() {
                let mut written = 0u32;
                unsafe { WriteFile(self.handle, Some(buf), Some(&mut written), None) }
                    .map_err(|_| Error::Disconnected)?;
                if written == 0 {
                    return Err(Error::Disconnected);
                }
                buf = &buf[written as usize..];
            }
            Ok(())
        }

        fn read_all(&mut self, mut buf: &mut [u8]) -> Result<()> {
            while !buf.is_empty() {
                let mut read = 0u32;
                unsafe { ReadFile(self.handle, Some(buf), Some(&mut read), None) }
                    .map_err(|_| Error::Disconnected)?;
                if read == 0 {
                    return Err(Error::Disconnected);
                }
                buf = &mut buf[read as usize..];
            }
            Ok(())
        }
    }

    impl Drop for ControlChannel {
        fn drop(&mut self) {
            if self.owned {
                unsafe {
                    let _ = CloseHandle(self.handle);
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::messages::MessageType;
    use crate::Error;

    fn unique_name(tag: &str) -> String {
        format!("ox_ctrl_test_{}_{}", tag, std::process::id())
    }

    #[test]
    fn framed_round_trip() {
        let name = unique_name("roundtrip");
        let listener = ControlListener::bind(&name).unwrap();

        let server = std::thread::spawn(move || {
            let mut channel = listener.accept().unwrap();
            let (header, payload) = channel.recv().unwrap();
            assert_eq!(header.message_type, MessageType::AllocateHandle);
            assert_eq!(header.sequence, 5);
            assert_eq!(payload, vec![1, 0, 0, 0]);
            channel
                .send(MessageType::Response, header.sequence, &[9, 9])
                .unwrap();
        });

        let mut client = ControlChannel::connect(&name, Duration::from_secs(5)).unwrap();
        client
            .send(MessageType::AllocateHandle, 5, &[1, 0, 0, 0])
            .unwrap();
        let (header, payload) = client.recv().unwrap();
        assert_eq!(header.message_type, MessageType::Response);
        assert_eq!(header.sequence, 5);
        assert_eq!(payload, vec![9, 9]);

        server.join().unwrap();
    }

    #[test]
    fn empty_payload_frames() {
        let name = unique_name("empty");
        let listener = ControlListener::bind(&name).unwrap();

        let server = std::thread::spawn(move || {
            let mut channel = listener.accept().unwrap();
            let (header, payload) = channel.recv().unwrap();
            assert_eq!(header.message_type, MessageType::Connect);
            assert!(payload.is_empty());
            channel
                .send(MessageType::Response, header.sequence, &[])
                .unwrap();
        });

        let mut client = ControlChannel::connect(&name, Duration::from_secs(5)).unwrap();
        client.send(MessageType::Connect, 0, &[]).unwrap();
        let (header, payload) = client.recv().unwrap();
        assert_eq!(header.message_type, MessageType::Response);
        assert!(payload.is_empty());

        server.join().unwrap();
    }

    #[test]
    fn peer_close_is_disconnect() {
        let name = unique_name("close");
        let listener = ControlListener::bind(&name).unwrap();

        let server = std::thread::spawn(move || {
            let channel = listener.accept().unwrap();
            drop(channel);
        });

        let mut client = ControlChannel::connect(&name, Duration::from_secs(5)).unwrap();
        server.join().unwrap();
        assert!(matches!(client.recv(), Err(Error::Disconnected)));
    }

    #[test]
    fn connect_without_service_times_out() {
        let name = unique_name("absent");
        let started = std::time::Instant::now();
        let result = ControlChannel::connect(&name, Duration::from_millis(200));
        assert!(matches!(result, Err(Error::ConnectTimeout(_))));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
