//! Single writer actor. Every write job runs on one dedicated connection inside
//! an `IMMEDIATE` transaction, so jobs are serialized and each one is atomic.

use std::any::Any;

use diesel::sqlite::SqliteConnection;
use log::{debug, error};
use tokio::sync::{mpsc, oneshot};

use waypost_core::errors::{DatabaseError, Error, Result};

use super::{DbConnection, DbPool};
use crate::errors::StorageError;

type BoxedValue = Box<dyn Any + Send>;
type Job = Box<dyn FnOnce(&mut SqliteConnection) -> Result<BoxedValue> + Send>;

struct Envelope {
    job: Job,
    reply: oneshot::Sender<Result<BoxedValue>>,
}

enum TxError {
    Diesel(diesel::result::Error),
    Job(Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        TxError::Diesel(err)
    }
}

impl From<TxError> for Error {
    fn from(err: TxError) -> Self {
        match err {
            TxError::Diesel(e) => StorageError::from(e).into(),
            TxError::Job(e) => e,
        }
    }
}

#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl WriteHandle {
    /// Runs `f` on the writer connection in its own transaction. An error from
    /// `f` rolls back everything it wrote.
    pub async fn exec<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| f(conn).map(|value| Box::new(value) as BoxedValue));

        self.tx
            .send(Envelope {
                job,
                reply: reply_tx,
            })
            .map_err(|_| writer_closed())?;

        let boxed = reply_rx.await.map_err(|_| writer_closed())??;
        boxed
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| Error::Unexpected("writer returned an unexpected value type".to_string()))
    }
}

fn writer_closed() -> Error {
    Error::Database(DatabaseError::ConnectionFailed(
        "store writer is closed".to_string(),
    ))
}

/// Starts the writer thread. It exits once every [`WriteHandle`] is dropped.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let spawned = std::thread::Builder::new()
        .name("waypost-writer".to_string())
        .spawn(move || {
            let mut conn: Option<DbConnection> = None;
            while let Some(Envelope { job, reply }) = rx.blocking_recv() {
                if conn.is_none() {
                    match pool.get() {
                        Ok(c) => conn = Some(c),
                        Err(e) => {
                            error!("[Store] Writer could not acquire a connection: {}", e);
                            let _ = reply.send(Err(StorageError::from(e).into()));
                            continue;
                        }
                    }
                }
                let Some(c) = conn.as_mut() else {
                    continue;
                };

                let result = c
                    .immediate_transaction::<BoxedValue, TxError, _>(|tx_conn| {
                        job(tx_conn).map_err(TxError::Job)
                    })
                    .map_err(Error::from);
                let _ = reply.send(result);
            }
            debug!("[Store] Writer stopped");
        });
    if let Err(e) = spawned {
        error!("[Store] Failed to start writer thread: {}", e);
    }

    WriteHandle { tx }
}
