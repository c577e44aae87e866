use std::{fmt, net::SocketAddr, sync::Arc};

use log::{Level, debug, info, log};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{
    constants::{HEADER_SIZE, MAX_ROWS, PREALLOC_CELLS},
    logging::Scope,
    predictor::Predictor,
    protocol::{Header, Matrix, encode_predictions},
};

pub type SessionId = u64;

/// Why a session stopped serving its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the connection between two requests.
    Closed,
    /// The peer reset the connection.
    Reset,
    /// Any other transport failure, including frames cut short.
    Io(String),
    /// The predictor failed or answered with the wrong number of values.
    Predictor(String),
}

impl SessionEnd {
    pub fn is_benign(&self) -> bool {
        matches!(self, SessionEnd::Closed | SessionEnd::Reset)
    }

    /// Benign ends are routine and stay at debug, everything else is a warning.
    pub fn log_level(&self) -> Level {
        if self.is_benign() {
            Level::Debug
        } else {
            Level::Warn
        }
    }
}

impl From<std::io::Error> for SessionEnd {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::ConnectionReset => SessionEnd::Reset,
            std::io::ErrorKind::UnexpectedEof => {
                SessionEnd::Io("connection closed in the middle of a frame".to_owned())
            }
            _ => SessionEnd::Io(e.to_string()),
        }
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Closed => write!(f, "closed by peer"),
            SessionEnd::Reset => write!(f, "reset by peer"),
            SessionEnd::Io(e) => write!(f, "connection error: {e}"),
            SessionEnd::Predictor(e) => write!(f, "prediction failed: {e}"),
        }
    }
}

/// Serves forecast requests on one connection until it goes away.
///
/// The stream is owned by the session and dropped exactly once, when
/// [`Session::run`] returns, whatever the reason.
pub struct Session<S> {
    id: SessionId,
    peer: SocketAddr,
    stream: BufReader<S>,
    predictor: Arc<dyn Predictor>,
    scope: Scope,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        id: SessionId,
        stream: S,
        peer: SocketAddr,
        predictor: Arc<dyn Predictor>,
        scope: &Scope,
    ) -> Self {
        Self {
            id,
            peer,
            stream: BufReader::new(stream),
            predictor,
            scope: scope.child("session"),
        }
    }

    pub async fn run(mut self) -> SessionEnd {
        debug!(target: self.scope.target(), "[{}] {}: client connected", self.id, self.peer);
        let end = loop {
            if let Err(end) = self.serve_one().await {
                break end;
            }
        };

        log!(target: self.scope.target(), end.log_level(), "[{}] {}: {}", self.id, self.peer, end);
        end
    }

    async fn serve_one(&mut self) -> Result<(), SessionEnd> {
        let header = read_header(&mut self.stream).await?;
        info!(
            target: self.scope.target(),
            "[{}] {}: matrix {} * {}", self.id, self.peer, header.rows, header.cols
        );

        let matrix = read_matrix(&mut self.stream, header).await?;
        debug!(target: self.scope.target(), "[{}] Received: {:?}", self.id, matrix);

        let predictions = self
            .predictor
            .predict(&matrix)
            .await
            .map_err(|e| SessionEnd::Predictor(format!("{e:#}")))?;
        if predictions.len() != matrix.nrows() {
            return Err(SessionEnd::Predictor(format!(
                "{} values predicted for {} rows",
                predictions.len(),
                matrix.nrows()
            )));
        }
        debug!(target: self.scope.target(), "[{}] Predicted end.", self.id);

        write_predictions(&mut self.stream, &predictions).await
    }
}

async fn read_header<R>(reader: &mut R) -> Result<Header, SessionEnd>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_SIZE];
    let n = reader.read(&mut buf).await?;
    // nothing of a new frame arrived, a regular goodbye
    if n == 0 {
        return Err(SessionEnd::Closed);
    }
    reader.read_exact(&mut buf[n..]).await?;
    Ok(Header::from(buf))
}

async fn read_matrix<R>(reader: &mut R, header: Header) -> Result<Matrix, SessionEnd>
where
    R: AsyncRead + Unpin,
{
    if header.rows > MAX_ROWS {
        return Err(SessionEnd::Io(format!(
            "matrix with {} rows exceeds the limit of {MAX_ROWS}",
            header.rows
        )));
    }
    let cells = header.cells().ok_or_else(|| {
        SessionEnd::Io(format!(
            "matrix {} * {} is too large for this host",
            header.rows, header.cols
        ))
    })?;

    let mut data = Vec::with_capacity(cells.min(PREALLOC_CELLS));
    for _ in 0..cells {
        data.push(reader.read_i32_le().await?);
    }
    Ok(Matrix::from_row_slice(
        header.rows as usize,
        header.cols as usize,
        &data,
    ))
}

async fn write_predictions<W>(writer: &mut W, values: &[f64]) -> Result<(), SessionEnd>
where
    W: AsyncWrite + Unpin,
{
    let buf = encode_predictions(values);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::{Blocking, LastValue};
    use crate::protocol::{decode_predictions, encode_request, matrix_from_rows};
    use anyhow::anyhow;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    fn start(predictor: Arc<dyn Predictor>) -> (DuplexStream, JoinHandle<SessionEnd>) {
        let (client, server) = tokio::io::duplex(4096);
        let peer = "127.0.0.1:40000".parse().unwrap();
        let session = Session::new(7, server, peer, predictor, &Scope::default());
        (client, tokio::spawn(session.run()))
    }

    async fn ask(client: &mut DuplexStream, rows: Vec<Vec<i32>>) -> Vec<f64> {
        let matrix = matrix_from_rows(rows).unwrap();
        client
            .write_all(&encode_request(&matrix).unwrap())
            .await
            .unwrap();
        let mut buf = vec![0; matrix.nrows() * 8];
        client.read_exact(&mut buf).await.unwrap();
        decode_predictions(&buf).unwrap()
    }

    #[tokio::test]
    async fn test_immediate_close_is_clean() {
        let (client, session) = start(Arc::new(LastValue));
        drop(client);
        assert_eq!(session.await.unwrap(), SessionEnd::Closed);
    }

    #[tokio::test]
    async fn test_single_request() {
        let (mut client, session) = start(Arc::new(LastValue));
        let predicted = ask(&mut client, vec![vec![1, 2], vec![3, 4], vec![5, 6]]).await;
        assert_eq!(predicted, vec![2.0, 4.0, 6.0]);

        drop(client);
        assert_eq!(session.await.unwrap(), SessionEnd::Closed);
    }

    #[tokio::test]
    async fn test_sequential_requests_in_order() {
        let (mut client, session) = start(Arc::new(LastValue));
        assert_eq!(ask(&mut client, vec![vec![10, 11]]).await, vec![11.0]);
        assert_eq!(
            ask(&mut client, vec![vec![-1], vec![-2], vec![-3]]).await,
            vec![-1.0, -2.0, -3.0]
        );
        drop(client);
        assert!(session.await.unwrap().is_benign());
    }

    #[tokio::test]
    async fn test_header_split_across_writes() {
        let (mut client, session) = start(Arc::new(LastValue));
        client.write_all(&[1, 0, 0]).await.unwrap();
        client.flush().await.unwrap();
        tokio::task::yield_now().await;
        client.write_all(&[0, 1, 0, 0, 0]).await.unwrap();
        client.write_all(&42i32.to_le_bytes()).await.unwrap();

        let mut buf = [0; 8];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(f64::from_le_bytes(buf), 42.0);
        drop(client);
        assert_eq!(session.await.unwrap(), SessionEnd::Closed);
    }

    #[tokio::test]
    async fn test_zero_rows_or_cols() {
        let (mut client, session) = start(Arc::new(LastValue));

        // 0 * 5 reads no cells and answers with nothing
        client.write_all(&[0, 0, 0, 0, 5, 0, 0, 0]).await.unwrap();
        // 2 * 0 reads no cells and answers with two doubles
        client.write_all(&[2, 0, 0, 0, 0, 0, 0, 0]).await.unwrap();
        let mut buf = [0; 16];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(decode_predictions(&buf).unwrap(), vec![0.0, 0.0]);

        // the stream is still in sync afterwards
        assert_eq!(ask(&mut client, vec![vec![3, 9]]).await, vec![9.0]);
        drop(client);
        assert_eq!(session.await.unwrap(), SessionEnd::Closed);
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let (mut client, session) = start(Arc::new(LastValue));
        client.write_all(&[3, 0, 0]).await.unwrap();
        drop(client);
        assert!(matches!(session.await.unwrap(), SessionEnd::Io(_)));
    }

    #[tokio::test]
    async fn test_truncated_matrix() {
        let (mut client, session) = start(Arc::new(LastValue));
        client.write_all(&[2, 0, 0, 0, 2, 0, 0, 0]).await.unwrap();
        for value in [1i32, 2, 3] {
            client.write_all(&value.to_le_bytes()).await.unwrap();
        }
        // half of the fourth cell
        client.write_all(&[4, 0]).await.unwrap();
        drop(client);
        assert!(matches!(session.await.unwrap(), SessionEnd::Io(_)));
    }

    #[tokio::test]
    async fn test_predictor_failure_closes_connection() {
        let failing = Blocking::new(|_: &Matrix| Err(anyhow!("model offline")));
        let (mut client, session) = start(Arc::new(failing));
        client
            .write_all(&encode_request(&Matrix::zeros(1, 1)).unwrap())
            .await
            .unwrap();

        assert_eq!(
            session.await.unwrap(),
            SessionEnd::Predictor("model offline".to_owned())
        );
        let mut rest = Vec::new();
        assert_eq!(client.read_to_end(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wrong_prediction_length() {
        let short = Blocking::new(|_: &Matrix| Ok(vec![1.0]));
        let (mut client, session) = start(Arc::new(short));
        client
            .write_all(&encode_request(&Matrix::zeros(3, 1)).unwrap())
            .await
            .unwrap();
        assert!(matches!(session.await.unwrap(), SessionEnd::Predictor(_)));
    }

    #[tokio::test]
    async fn test_too_many_rows_never_reach_predictor() {
        let asked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen = Arc::clone(&asked);
        let recording = Blocking::new(move |_: &Matrix| {
            seen.store(true, std::sync::atomic::Ordering::SeqCst);
            Err(anyhow!("unreachable"))
        });
        let (mut client, session) = start(Arc::new(recording));

        // u32::MAX rows without a single column carries no cells at all
        client.write_all(&[0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]).await.unwrap();
        assert!(matches!(session.await.unwrap(), SessionEnd::Io(_)));
        assert!(!asked.load(std::sync::atomic::Ordering::SeqCst));

        let mut rest = Vec::new();
        assert_eq!(client.read_to_end(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_row_limit_is_inclusive() {
        let (mut client, session) = start(Arc::new(LastValue));
        client.write_all(&MAX_ROWS.to_le_bytes()).await.unwrap();
        client.write_all(&0u32.to_le_bytes()).await.unwrap();
        let mut buf = vec![0; MAX_ROWS as usize * 8];
        client.read_exact(&mut buf).await.unwrap();
        assert!(buf.iter().all(|b| *b == 0));

        drop(client);
        assert_eq!(session.await.unwrap(), SessionEnd::Closed);
    }

    #[tokio::test]
    async fn test_reset_mid_frame_is_benign() {
        let server = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = server.accept().await.unwrap();
        let session = tokio::spawn(
            Session::new(3, stream, peer, Arc::new(LastValue), &Scope::default()).run(),
        );

        client.write_all(&[1, 0, 0]).await.unwrap();
        // zero linger turns the close into a RST
        #[allow(deprecated)]
        client.set_linger(Some(std::time::Duration::ZERO)).unwrap();
        drop(client);

        let end = session.await.unwrap();
        assert_eq!(end, SessionEnd::Reset);
        assert_eq!(end.log_level(), Level::Debug);
    }

    #[test]
    fn test_only_benign_ends_stay_quiet() {
        assert_eq!(SessionEnd::Closed.log_level(), Level::Debug);
        assert_eq!(SessionEnd::Reset.log_level(), Level::Debug);
        assert_eq!(SessionEnd::Io("eof".to_owned()).log_level(), Level::Warn);
        assert_eq!(
            SessionEnd::Predictor("model offline".to_owned()).log_level(),
            Level::Warn
        );
    }

    #[test]
    fn test_io_error_classification() {
        use std::io::{Error, ErrorKind};

        assert_eq!(
            SessionEnd::from(Error::from(ErrorKind::ConnectionReset)),
            SessionEnd::Reset
        );
        assert!(matches!(
            SessionEnd::from(Error::from(ErrorKind::UnexpectedEof)),
            SessionEnd::Io(_)
        ));
        assert!(matches!(
            SessionEnd::from(Error::from(ErrorKind::BrokenPipe)),
            SessionEnd::Io(_)
        ));
        assert!(SessionEnd::Reset.is_benign());
        assert!(!SessionEnd::Io("x".to_owned()).is_benign());
    }
}
