//! Pipe Transport - 标准输入输出上的命令通道
//!
//! 输入是连续的 JSON 信封，不依赖换行分隔，一个值完整即处理；
//! 每个响应写出 JSON 后紧跟 `<<END>>` 结束符。

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::application::{CommandDispatcher, CommandEnvelope, CommandResponse};

/// 响应结束符
pub const RESPONSE_TERMINATOR: &str = "<<END>>";

const READ_CHUNK_SIZE: usize = 4096;

/// 从缓冲区切出的一条输入
#[derive(Debug)]
enum Frame {
    Message(Value),
    Malformed(String),
}

/// 管道服务
pub struct PipeServer {
    dispatcher: Arc<CommandDispatcher>,
}

impl PipeServer {
    pub fn new(dispatcher: Arc<CommandDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// 使用进程的 stdin / stdout 运行
    pub async fn run_stdio(self) -> std::io::Result<()> {
        self.run(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// 读取直到 EOF 或收到 shutdown
    pub async fn run<R, W>(self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buffer: Vec<u8> = Vec::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        tracing::info!("Pipe transport started");

        loop {
            let read = reader.read(&mut chunk).await?;
            let eof = read == 0;
            buffer.extend_from_slice(&chunk[..read]);

            let (frames, consumed) = split_frames(&buffer, eof);
            buffer.drain(..consumed);

            for frame in frames {
                let (response, shutdown) = self.handle(frame).await;
                if !response.success {
                    tracing::warn!(
                        message = response.message.as_deref().unwrap_or(""),
                        "Command failed"
                    );
                }
                write_response(&mut writer, &response).await?;

                if shutdown {
                    tracing::info!("Shutdown requested via pipe");
                    return Ok(());
                }
            }

            if eof {
                tracing::info!("Pipe closed");
                return Ok(());
            }
        }
    }

    async fn handle(&self, frame: Frame) -> (CommandResponse, bool) {
        let value = match frame {
            Frame::Message(value) => value,
            Frame::Malformed(reason) => {
                tracing::warn!(error = %reason, "Malformed command envelope");
                return (CommandResponse::malformed(), false);
            }
        };

        match serde_json::from_value::<CommandEnvelope>(value) {
            Ok(envelope) => {
                let outcome = self.dispatcher.dispatch(envelope).await;
                (outcome.response, outcome.shutdown)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed command envelope");
                (CommandResponse::malformed(), false)
            }
        }
    }
}

/// 切出缓冲区中所有完整的 JSON 值，返回已消费的字节数
///
/// 未完成的值留在缓冲区等待更多输入；语法错误跳到下一个换行后继续。
fn split_frames(buffer: &[u8], eof: bool) -> (Vec<Frame>, usize) {
    let mut frames = Vec::new();
    let mut consumed = 0;

    while consumed < buffer.len() {
        let rest = &buffer[consumed..];
        let mut stream = serde_json::Deserializer::from_slice(rest).into_iter::<Value>();

        match stream.next() {
            // 只剩空白
            None => consumed = buffer.len(),
            Some(Ok(value)) => {
                consumed += stream.byte_offset();
                frames.push(Frame::Message(value));
            }
            Some(Err(e)) if e.is_eof() && !eof => break,
            Some(Err(e)) => {
                frames.push(Frame::Malformed(e.to_string()));
                consumed += rest
                    .iter()
                    .position(|b| *b == b'\n')
                    .map_or(rest.len(), |i| i + 1);
            }
        }
    }

    (frames, consumed)
}

async fn write_response<W>(writer: &mut W, response: &CommandResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(RESPONSE_TERMINATOR.as_bytes()).await?;
    writer.flush().await
}
