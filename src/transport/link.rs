use {
	super::Transport,
	crate::primitives::{deserialize, try_serialize},
	bytes::{Bytes, BytesMut},
	futures::{SinkExt, StreamExt},
	iroh::{
		EndpointAddr,
		EndpointId,
		endpoint::{
			ApplicationClose,
			Connection,
			ConnectionError,
			RecvStream,
			SendStream,
			VarInt,
		},
	},
	serde::{Serialize, de::DeserializeOwned},
	std::io,
	strum::{AsRefStr, FromRepr, IntoStaticStr},
	tokio::io::{Join, join},
	tokio_util::{
		codec::{Framed, LengthDelimitedCodec},
		sync::CancellationToken,
	},
};

/// One framed bidirectional stream between two agents.
///
/// Notes:
///
/// - This is where the framing semantics are defined: [`Framed`] with
///   [`LengthDelimitedCodec`], each frame carrying one postcard-encoded
///   message.
///
/// - Several links can ride one connection; the underlying transport
///   multiplexes streams, so a pooled connection serves many concurrent
///   requests.
pub struct Link {
	alpn: Vec<u8>,
	connection: Connection,
	stream: Framed<Join<RecvStream, SendStream>, LengthDelimitedCodec>,
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
	#[error("connect failed: {0}")]
	Connect(#[from] iroh::endpoint::ConnectError),

	#[error("connection lost: {0}")]
	Connection(#[from] ConnectionError),

	#[error("handshake timed out")]
	HandshakeTimeout,

	#[error("cancelled")]
	Cancelled,
}

impl Link {
	/// Accepts an incoming connection's first bidirectional stream.
	pub async fn accept(connection: Connection) -> Result<Self, OpenError> {
		let alpn = connection.alpn().to_owned();
		let (tx, rx) = connection.accept_bi().await?;
		Ok(Self::from_parts(alpn, connection, rx, tx))
	}

	/// Accepts with cancellation, for protocol handlers bound to the agent
	/// lifecycle.
	pub async fn accept_with_cancel(
		connection: Connection,
		cancel: CancellationToken,
	) -> Result<Self, OpenError> {
		tokio::select! {
			link = Self::accept(connection) => link,
			_ = cancel.cancelled() => Err(OpenError::Cancelled),
		}
	}

	/// Opens a fresh connection to a remote peer and a stream on it, with
	/// the transport's handshake timeout applied.
	pub async fn open(
		transport: &Transport,
		remote: impl Into<EndpointAddr>,
		alpn: &[u8],
	) -> Result<Self, OpenError> {
		let remote = remote.into();
		let handshake = transport.config().handshake_timeout;

		let connect = async {
			let connection =
				transport.endpoint().connect(remote, alpn).await?;
			let (tx, rx) = connection.open_bi().await?;
			Ok(Self::from_parts(alpn.to_owned(), connection, rx, tx))
		};

		tokio::time::timeout(handshake, connect)
			.await
			.map_err(|_| OpenError::HandshakeTimeout)?
	}

	/// Opens an additional stream on an already established connection.
	pub async fn open_on(connection: Connection) -> Result<Self, OpenError> {
		let alpn = connection.alpn().to_owned();
		let (tx, rx) = connection.open_bi().await?;
		Ok(Self::from_parts(alpn, connection, rx, tx))
	}

	fn from_parts(
		alpn: Vec<u8>,
		connection: Connection,
		rx: RecvStream,
		tx: SendStream,
	) -> Self {
		Self {
			alpn,
			connection,
			stream: Framed::new(join(rx, tx), LengthDelimitedCodec::new()),
		}
	}

	/// The ALPN identifier this link was opened on.
	pub fn alpn(&self) -> &[u8] {
		&self.alpn
	}

	/// Remote peer's endpoint id.
	pub fn remote_id(&self) -> EndpointId {
		self.connection.remote_id()
	}

	/// The underlying connection.
	pub const fn connection(&self) -> &Connection {
		&self.connection
	}

	/// Receives the next raw frame.
	pub async fn recv_raw(&mut self) -> Result<BytesMut, io::Error> {
		self.stream.next().await.transpose()?.ok_or_else(|| {
			io::Error::new(io::ErrorKind::UnexpectedEof, "link closed")
		})
	}

	/// Receives and decodes the next framed message.
	pub async fn recv<D: DeserializeOwned>(&mut self) -> Result<D, io::Error> {
		let bytes = self.recv_raw().await?;
		deserialize(&bytes)
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
	}

	/// Encodes and sends one framed message.
	pub async fn send<D: Serialize>(
		&mut self,
		datum: &D,
	) -> Result<(), io::Error> {
		let frame = try_serialize(datum)
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
		self.stream.send(frame).await
	}

	/// Sends a pre-encoded frame.
	pub async fn send_raw(&mut self, frame: Bytes) -> Result<(), io::Error> {
		self.stream.send(frame).await
	}

	/// Flushes, closes the stream and the connection with a reason, and
	/// waits for the closure to complete.
	pub async fn close_with_reason(
		mut self,
		reason: CloseReason,
	) -> Result<(), io::Error> {
		self.stream.flush().await?;
		self.stream.close().await?;

		self
			.connection
			.close(VarInt::from(reason as u8), reason.into());

		let close_result = self.connection.closed().await;
		if close_result != ConnectionError::LocallyClosed {
			return Err(io::Error::other(close_result));
		}

		Ok(())
	}

	/// Finishes the stream without closing the underlying connection, so a
	/// pooled connection stays reusable.
	pub async fn finish(mut self) -> Result<(), io::Error> {
		self.stream.flush().await?;
		self.stream.close().await?;
		Ok(())
	}

	/// Awaits the connection closure and reports failures that were not a
	/// clean success close.
	pub async fn closed(self) -> Result<(), ConnectionError> {
		match self.connection.closed().await {
			ConnectionError::LocallyClosed => Ok(()),
			ConnectionError::ApplicationClosed(ApplicationClose {
				error_code,
				..
			}) if error_code == VarInt::from(CloseReason::Success as u8) => {
				Ok(())
			}
			err => Err(err),
		}
	}
}

impl core::fmt::Debug for Link {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Link")
			.field("alpn", &String::from_utf8_lossy(&self.alpn))
			.field("remote_id", &self.connection.remote_id())
			.finish_non_exhaustive()
	}
}

#[derive(
	Debug, Clone, Copy, IntoStaticStr, AsRefStr, FromRepr, thiserror::Error,
)]
#[repr(u8)]
pub enum CloseReason {
	#[error("protocol ran to completion successfully")]
	Success = 0,

	#[error("unspecified")]
	Unspecified = 1,

	#[error("invalid message")]
	InvalidMessage = 2,

	#[error("source address not permitted")]
	CidrDenied = 3,

	#[error("connection limit reached")]
	ConnectionLimit = 4,

	#[error("cluster mismatch")]
	ClusterMismatch = 5,
}

impl From<CloseReason> for &'static [u8] {
	fn from(val: CloseReason) -> Self {
		let bytes: &'static str = val.into();
		bytes.as_bytes()
	}
}
