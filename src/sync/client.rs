use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    GlobalStatistics, SharedLearningData, SubmitOutcome, SyncGateway, SyncRequest, VideoFingerprint,
};
use crate::config::SyncConfig;
use crate::error::{Result, SkipError};
use crate::features::FeatureBundle;
use crate::learning::UserAction;
use crate::predictors::Prediction;

/// HTTP sync gateway with retry and an offline replay buffer.
///
/// Starts optimistic: the first failed submission marks the gateway offline,
/// after which submissions are buffered until [`check_connection`] succeeds.
/// The gateway only comes back online once the buffer has fully drained, and
/// submissions arriving during a replay queue up behind it, so the remote
/// always sees requests in submission order.
///
/// [`check_connection`]: HttpSyncGateway::check_connection
pub struct HttpSyncGateway {
    config: SyncConfig,
    base_url: Url,
    client: reqwest::Client,
    pending: Mutex<VecDeque<SyncRequest>>,
    connected: AtomicBool,
}

impl HttpSyncGateway {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let raw = config
            .base_url
            .clone()
            .ok_or_else(|| SkipError::Configuration("sync base_url not configured".to_string()))?;
        // Url::join drops the last path segment unless the base ends with a slash
        let raw = if raw.ends_with('/') { raw } else { format!("{}/", raw) };
        let base_url = Url::parse(&raw)
            .map_err(|e| SkipError::Configuration(format!("invalid sync base_url {}: {}", raw, e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            base_url,
            client,
            pending: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(true),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Check the remote and, when reachable, replay buffered submissions in order
    pub async fn check_connection(&self) -> bool {
        match self.get_global_statistics().await {
            Ok(stats) => {
                let was_connected = self.is_connected();
                let replayed = self.flush_pending().await;
                if replayed > 0 {
                    info!("📤 Replayed {} buffered submissions", replayed);
                }
                let connected = self.is_connected();
                if connected && !was_connected {
                    info!("🌐 Sync gateway reachable again ({} shared predictions)", stats.total_predictions);
                }
                connected
            }
            Err(e) => {
                debug!("Sync gateway unreachable: {}", e);
                self.connected.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Send buffered submissions front to back, stopping at the first failure.
    ///
    /// The buffer stays locked for the whole replay and the gateway is marked
    /// online only once it is empty.
    pub async fn flush_pending(&self) -> usize {
        let mut pending = self.pending.lock().await;
        let mut sent = 0;

        while let Some(request) = pending.front() {
            if let Err(e) = self.send(request).await {
                warn!("Replay of buffered submission failed: {}", e);
                self.connected.store(false, Ordering::SeqCst);
                return sent;
            }
            pending.pop_front();
            sent += 1;
        }

        self.connected.store(true, Ordering::SeqCst);
        sent
    }

    async fn submit_request(&self, request: SyncRequest) -> SubmitOutcome {
        {
            let mut pending = self.pending.lock().await;
            if !self.is_connected() || !pending.is_empty() {
                return self.push_pending(&mut pending, request);
            }
        }

        match self.send_with_retry(&request).await {
            Ok(()) => SubmitOutcome::Accepted,
            Err(e) => {
                warn!("Sync submission failed, switching to offline mode: {}", e);
                self.connected.store(false, Ordering::SeqCst);
                self.buffer(request).await
            }
        }
    }

    async fn buffer(&self, request: SyncRequest) -> SubmitOutcome {
        let mut pending = self.pending.lock().await;
        self.push_pending(&mut pending, request)
    }

    fn push_pending(&self, pending: &mut VecDeque<SyncRequest>, request: SyncRequest) -> SubmitOutcome {
        if pending.len() >= self.config.max_pending {
            warn!("Offline buffer full ({} pending), dropping submission", pending.len());
            return SubmitOutcome::Failed;
        }
        pending.push_back(request);
        SubmitOutcome::Buffered
    }

    /// Retry with exponential backoff
    async fn send_with_retry(&self, request: &SyncRequest) -> Result<()> {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.send(request).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        let delay = Duration::from_millis(self.config.retry_base_delay_ms * 2_u64.pow(attempt));
                        warn!("Sync attempt {} failed, retrying in {:?}", attempt + 1, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SkipError::Gateway("all sync attempts failed".to_string())))
    }

    async fn send(&self, request: &SyncRequest) -> Result<()> {
        let path = match request {
            SyncRequest::Prediction { .. } => "predictions",
            SyncRequest::UserAction { .. } => "user-actions",
        };
        let url = self.endpoint(path)?;

        let response = self.authorize(self.client.post(url)).json(request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SkipError::Gateway(format!("{} {}: {}", path, status, text)));
        }
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        let response = self.authorize(self.client.get(url)).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SkipError::Gateway(format!("{} {}: {}", path, status, text)));
        }
        Ok(response.json().await?)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SkipError::Configuration(format!("invalid endpoint {}: {}", path, e)))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }
}

#[async_trait]
impl SyncGateway for HttpSyncGateway {
    async fn submit_prediction(
        &self,
        fingerprint: &VideoFingerprint,
        prediction: &Prediction,
        features: &FeatureBundle,
    ) -> SubmitOutcome {
        self.submit_request(SyncRequest::Prediction {
            fingerprint: fingerprint.clone(),
            prediction: prediction.clone(),
            features: features.clone(),
        })
        .await
    }

    async fn submit_user_action(
        &self,
        fingerprint: &VideoFingerprint,
        action: UserAction,
        timestamp: f64,
        prediction_id: Option<&str>,
    ) -> SubmitOutcome {
        self.submit_request(SyncRequest::UserAction {
            fingerprint: fingerprint.clone(),
            action,
            timestamp,
            prediction_id: prediction_id.map(str::to_string),
        })
        .await
    }

    async fn get_shared_learning_data(&self, fingerprint: &VideoFingerprint) -> Result<SharedLearningData> {
        self.get_json(&format!("learning/{}", fingerprint.hash)).await
    }

    async fn get_global_statistics(&self) -> Result<GlobalStatistics> {
        self.get_json("statistics").await
    }

    fn needs_reconnect(&self) -> bool {
        !self.is_connected()
    }

    async fn reconnect(&self) -> bool {
        self.check_connection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Platform;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn unreachable_config(max_pending: usize) -> SyncConfig {
        SyncConfig {
            enabled: true,
            // Port 9 (discard) is closed on test machines, connections are refused
            base_url: Some("http://127.0.0.1:9/api".to_string()),
            api_key: Some("secret".to_string()),
            timeout_seconds: 2,
            max_retries: 2,
            retry_base_delay_ms: 1,
            max_pending,
            queue_capacity: 16,
            reconnect_interval_ms: 10,
        }
    }

    fn request(timestamp: f64) -> SyncRequest {
        SyncRequest::UserAction {
            fingerprint: VideoFingerprint::compute("Show", Platform::Other, 1200),
            action: UserAction::SkipIntro,
            timestamp,
            prediction_id: None,
        }
    }

    #[test]
    fn test_requires_base_url() {
        let mut config = unreachable_config(10);
        config.base_url = None;
        assert!(HttpSyncGateway::new(config).is_err());
    }

    #[test]
    fn test_endpoints_keep_base_path() {
        let gateway = HttpSyncGateway::new(unreachable_config(10)).unwrap();
        assert_eq!(
            gateway.endpoint("statistics").unwrap().as_str(),
            "http://127.0.0.1:9/api/statistics"
        );
    }

    #[tokio::test]
    async fn test_failed_submission_is_buffered() {
        let gateway = HttpSyncGateway::new(unreachable_config(10)).unwrap();
        let fingerprint = VideoFingerprint::compute("Show", Platform::Other, 1200);

        let outcome = gateway
            .submit_user_action(&fingerprint, UserAction::SkipIntro, 30.0, None)
            .await;
        assert_eq!(outcome, SubmitOutcome::Buffered);
        assert!(!gateway.is_connected());
        assert_eq!(gateway.pending_count().await, 1);

        // Offline: buffered straight away
        let outcome = gateway
            .submit_user_action(&fingerprint, UserAction::NextEpisode, 1150.0, Some("p-1"))
            .await;
        assert_eq!(outcome, SubmitOutcome::Buffered);
        assert_eq!(gateway.pending_count().await, 2);

        assert!(!gateway.check_connection().await);
        assert_eq!(gateway.pending_count().await, 2);
    }

    #[tokio::test]
    async fn test_buffer_is_capped() {
        let gateway = HttpSyncGateway::new(unreachable_config(2)).unwrap();
        assert_eq!(gateway.submit(&request(1.0)).await, SubmitOutcome::Buffered);
        assert_eq!(gateway.submit(&request(2.0)).await, SubmitOutcome::Buffered);
        assert_eq!(gateway.submit(&request(3.0)).await, SubmitOutcome::Failed);
        assert_eq!(gateway.pending_count().await, 2);
    }

    #[tokio::test]
    async fn test_failed_replay_keeps_order() {
        let gateway = HttpSyncGateway::new(unreachable_config(10)).unwrap();
        gateway.submit(&request(1.0)).await;
        gateway.submit(&request(2.0)).await;

        assert_eq!(gateway.flush_pending().await, 0);
        let pending = gateway.pending.lock().await;
        assert_eq!(pending.front(), Some(&request(1.0)));
        assert_eq!(pending.back(), Some(&request(2.0)));
    }

    /// Minimal HTTP/1.1 responder: answers `{}` and logs "METHOD path body" per request
    async fn serve(listener: TcpListener, log: Arc<std::sync::Mutex<Vec<String>>>) {
        while let Ok((stream, _)) = listener.accept().await {
            let log = log.clone();
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut reader = BufReader::new(read);
                loop {
                    let mut request_line = String::new();
                    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
                        return;
                    }

                    let mut content_length = 0;
                    loop {
                        let mut line = String::new();
                        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                            return;
                        }
                        let line = line.trim_end();
                        if line.is_empty() {
                            break;
                        }
                        if let Some((name, value)) = line.split_once(':') {
                            if name.eq_ignore_ascii_case("content-length") {
                                content_length = value.trim().parse().unwrap_or(0);
                            }
                        }
                    }

                    let mut body = vec![0; content_length];
                    if reader.read_exact(&mut body).await.is_err() {
                        return;
                    }
                    let mut parts = request_line.split_whitespace();
                    let method = parts.next().unwrap_or_default();
                    let path = parts.next().unwrap_or_default();
                    log.lock()
                        .unwrap()
                        .push(format!("{} {} {}", method, path, String::from_utf8_lossy(&body)));

                    let response = "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 2\r\n\r\n{}";
                    if write.write_all(response.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
        }
    }

    #[tokio::test]
    async fn test_buffer_replayed_in_order_when_remote_returns() {
        // Reserve a port and close it so the first submissions are refused
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = unreachable_config(10);
        config.base_url = Some(format!("http://{}/api", addr));
        let gateway = HttpSyncGateway::new(config).unwrap();

        assert_eq!(gateway.submit(&request(1.0)).await, SubmitOutcome::Buffered);
        assert_eq!(gateway.submit(&request(2.0)).await, SubmitOutcome::Buffered);
        assert!(gateway.needs_reconnect());

        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let listener = TcpListener::bind(addr).await.unwrap();
        tokio::spawn(serve(listener, log.clone()));

        assert!(gateway.reconnect().await);
        assert_eq!(gateway.pending_count().await, 0);
        assert!(!gateway.needs_reconnect());

        assert_eq!(gateway.submit(&request(3.0)).await, SubmitOutcome::Accepted);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4);
        assert!(log[0].starts_with("GET /api/statistics"));
        let timestamps: Vec<f64> = log[1..]
            .iter()
            .map(|entry| {
                assert!(entry.starts_with("POST /api/user-actions "));
                let body = entry.splitn(3, ' ').nth(2).unwrap();
                let body: serde_json::Value = serde_json::from_str(body).unwrap();
                body["timestamp"].as_f64().unwrap()
            })
            .collect();
        assert_eq!(timestamps, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_submissions_queue_behind_buffer_while_offline() {
        let gateway = HttpSyncGateway::new(unreachable_config(10)).unwrap();
        gateway.submit(&request(1.0)).await;

        // Still offline: later submissions join the back of the buffer without a send attempt
        assert_eq!(gateway.submit(&request(2.0)).await, SubmitOutcome::Buffered);
        assert!(!gateway.reconnect().await);
        let pending = gateway.pending.lock().await;
        assert_eq!(pending.iter().cloned().collect::<Vec<_>>(), vec![request(1.0), request(2.0)]);
    }
}
