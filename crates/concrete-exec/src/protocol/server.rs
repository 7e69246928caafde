//! Worker end of the channel.

use super::codec;
use super::message::{decode_payload, encode_payload, Command, Reply, Request, Response};
use crate::config::InstrumentationSpec;
use crate::execution::ExecutionContext;
use crate::model::{ConcreteExecutionData, FieldRef};
use crate::result::{ExecError, ExecResult};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info};

/// Why [`serve`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeExit {
    /// `stopProcess` was received and answered
    Stopped,
    /// The client closed its end
    InputClosed,
}

/// Answer requests until told to stop or the input ends.
///
/// Requests are handled one at a time, each on a blocking thread so user
/// code never runs on the reactor. A fatal error is answered and then
/// returned.
pub async fn serve<R, W>(
    mut reader: R,
    mut writer: W,
    context: ExecutionContext,
    max_frame_bytes: usize,
) -> ExecResult<ServeExit>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut context = Some(context);
    info!("worker serving requests");
    loop {
        let Some(request) = codec::recv::<_, Request>(&mut reader, max_frame_bytes).await? else {
            info!("input closed, worker exiting");
            return Ok(ServeExit::InputClosed);
        };
        let Request { id, command } = request;
        debug!(id, command = command.name(), "request received");

        if command == Command::StopProcess {
            let response = Response {
                id,
                reply: Reply::Stopping,
            };
            codec::send(&mut writer, &response, max_frame_bytes).await?;
            info!("stop requested, worker exiting");
            return Ok(ServeExit::Stopped);
        }

        let mut owned = context
            .take()
            .ok_or_else(|| ExecError::poisoned("execution context lost"))?;
        let joined = tokio::task::spawn_blocking(move || {
            let reply = handle(&mut owned, command);
            (owned, reply)
        })
        .await;
        let (owned, reply) = joined.map_err(|err| {
            error!(error = %err, "request handler panicked");
            ExecError::poisoned(format!("request handler failed: {err}"))
        })?;
        context = Some(owned);

        let fatal = match &reply {
            Err(err) if err.is_fatal() => Some(err.to_string()),
            _ => None,
        };
        let reply = reply.unwrap_or_else(|err| {
            debug!(id, error = %err, "request failed");
            Reply::from_error(&err)
        });
        codec::send(&mut writer, &Response { id, reply }, max_frame_bytes).await?;
        if let Some(message) = fatal {
            error!(message = %message, "worker poisoned, exiting");
            return Err(ExecError::poisoned(message));
        }
    }
}

/// Serve one command against the context
pub fn handle(context: &mut ExecutionContext, command: Command) -> ExecResult<Reply> {
    match command {
        Command::AddPaths { entries } => Ok(Reply::PathsAdded {
            count: context.add_paths(&entries)?,
        }),
        Command::Warmup => Ok(Reply::WarmedUp {
            classes: context.warmup()?,
        }),
        Command::SetInstrumentation { payload } => {
            context.set_instrumentation(InstrumentationSpec::from_payload(&payload)?);
            Ok(Reply::InstrumentationSet)
        }
        Command::Invoke {
            class,
            signature,
            payload,
        } => {
            let data: ConcreteExecutionData = decode_payload(&payload)?;
            let result = context.invoke(&class, &signature, &data)?;
            Ok(Reply::Invoked {
                payload: encode_payload(&result)?,
            })
        }
        Command::CollectCoverage { class } => Ok(Reply::Coverage {
            payload: encode_payload(&context.collect_coverage(&class)?)?,
        }),
        Command::ComputeStaticField { payload } => {
            let field: FieldRef = decode_payload(&payload)?;
            Ok(Reply::StaticField {
                payload: encode_payload(&context.compute_static_field(&field)?)?,
            })
        }
        Command::StopProcess => Ok(Reply::Stopping),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::model::{ClassId, EnvironmentModels, Model};
    use crate::protocol::WorkerClient;
    use std::sync::Arc;
    use std::time::Duration;

    const LIMIT: usize = 1 << 20;
    const DEADLINE: Duration = Duration::from_secs(5);

    fn context() -> ExecutionContext {
        ExecutionContext::new(Arc::new(fixtures::catalog()))
    }

    #[test]
    fn test_handle_reports_unknown_class() {
        let mut ctx = context();
        let err = handle(
            &mut ctx,
            Command::CollectCoverage {
                class: ClassId::new("samples.Nowhere"),
            },
        )
        .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_handle_rejects_garbage_payload() {
        let mut ctx = context();
        let err = handle(&mut ctx, Command::SetInstrumentation { payload: vec![0xff] }).unwrap_err();
        assert!(matches!(err, ExecError::Codec(_)));
    }

    #[tokio::test]
    async fn test_full_session_over_duplex() {
        let (client_side, worker_side) = tokio::io::duplex(1 << 16);
        let (worker_read, worker_write) = tokio::io::split(worker_side);
        let server = tokio::spawn(serve(worker_read, worker_write, context(), LIMIT));
        let (client_read, client_write) = tokio::io::split(client_side);
        let client = WorkerClient::new(Box::new(client_read), Box::new(client_write), LIMIT);

        assert!(client.add_paths(&[fixtures::ENTRY.to_string()], DEADLINE).await.unwrap() > 0);
        assert!(client.warmup(DEADLINE).await.unwrap() > 0);
        client
            .set_instrumentation(&InstrumentationSpec::new().with_max_depth(3), DEADLINE)
            .await
            .unwrap();

        let state = EnvironmentModels::new(None, vec![Model::int(5)]);
        let data = ConcreteExecutionData::new(state, 1000);
        let result = client
            .invoke(&ClassId::new("samples.Util"), "twice(int)int", &data, DEADLINE)
            .await
            .unwrap();
        assert_eq!(result.result.success(), Some(&Model::int(10)));

        let coverage = client
            .collect_coverage(&ClassId::new("samples.Util"), DEADLINE)
            .await
            .unwrap();
        assert_eq!(coverage.covered.len(), 1);

        let label = client
            .compute_static_field(&FieldRef::new("samples.Counter", "label"), DEADLINE)
            .await
            .unwrap();
        assert_eq!(label, Model::null(ClassId::STRING));

        let err = client
            .invoke(&ClassId::new("samples.Util"), "missing()void", &data, DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Remote { .. }));

        client.stop_process(DEADLINE).await.unwrap();
        assert_eq!(server.await.unwrap().unwrap(), ServeExit::Stopped);
    }

    #[tokio::test]
    async fn test_closed_input_ends_serving() {
        let (client_side, worker_side) = tokio::io::duplex(1024);
        let (worker_read, worker_write) = tokio::io::split(worker_side);
        drop(client_side);
        let exit = serve(worker_read, worker_write, context(), LIMIT).await.unwrap();
        assert_eq!(exit, ServeExit::InputClosed);
    }
}
