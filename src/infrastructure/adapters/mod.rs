//! Infrastructure Adapters
//!
//! 六边形架构的适配器实现

pub mod comfyui;
pub mod container;
pub mod fake;
pub mod invokeai;
pub mod nim;
pub mod storage;
pub mod wallpaper;

mod http_support;

pub use comfyui::{ComfyUiClient, ComfyUiConfig};
pub use container::{ContainerController, ProcessRunner, TokioProcessRunner};
pub use invokeai::{InvokeAiClient, InvokeAiConfig};
pub use nim::{NimClient, NimClientConfig, NimContainerConfig};
pub use storage::FileImageStorage;
pub use wallpaper::{CommandWallpaper, NoopWallpaper};

/// 测试用的本地 HTTP 假服务
#[cfg(test)]
pub(crate) mod testing {
    use axum::Router;

    /// 绑定 127.0.0.1 随机端口并返回 base URL
    pub(crate) async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }
}
