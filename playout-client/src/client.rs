//! High-level client API.

use crate::connection::{Connection, ConnectionConfig, ConnectionEvent, ConnectionState};
use crate::error::ClientError;
use playout_protocol::{
    AssembledResponse, CgOp, Command, MixerOp, PlayOptions, Target,
};
use tokio::sync::broadcast;

/// High-level client for one playout server.
#[derive(Clone)]
pub struct Client {
    conn: Connection,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Connection::new(config),
        }
    }

    /// Connects to the server.
    pub async fn connect(&self, host: impl Into<String>, port: u16) -> Result<(), ClientError> {
        self.conn.connect(host, port).await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Closes the connection.
    pub async fn disconnect(&self) {
        self.conn.disconnect().await
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.conn.subscribe()
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    /// Submits a command and waits for its response. 4xx and 5xx replies are
    /// returned as [`ClientError::ServerError`].
    pub async fn execute(&self, command: Command) -> Result<AssembledResponse, ClientError> {
        let response = self.conn.submit(command).await?.wait().await?.into_response()?;

        if response.is_error() {
            return Err(ClientError::ServerError {
                code: response.code,
                message: response.message().to_string(),
            });
        }

        Ok(response)
    }

    /// Sends a raw command line.
    pub async fn raw(&self, line: &str) -> Result<AssembledResponse, ClientError> {
        self.execute(Command::custom(line)).await
    }

    // =========================================================================
    // Playout
    // =========================================================================

    /// Loads a clip paused on its first frame.
    pub async fn load(&self, target: Target, clip: &str) -> Result<(), ClientError> {
        self.execute(Command::load(target, clip)).await?;
        Ok(())
    }

    /// Loads a clip in the background, to be played on the next PLAY.
    pub async fn load_bg(
        &self,
        target: Target,
        clip: &str,
        options: PlayOptions,
    ) -> Result<(), ClientError> {
        self.execute(Command::LoadBg {
            target,
            clip: clip.to_string(),
            options,
        })
        .await?;
        Ok(())
    }

    /// Plays what is loaded on the layer.
    pub async fn play(&self, target: Target) -> Result<(), ClientError> {
        self.execute(Command::play(target)).await?;
        Ok(())
    }

    pub async fn play_clip(
        &self,
        target: Target,
        clip: &str,
        options: PlayOptions,
    ) -> Result<(), ClientError> {
        self.execute(Command::play_clip(target, clip, options)).await?;
        Ok(())
    }

    pub async fn pause(&self, target: Target) -> Result<(), ClientError> {
        self.execute(Command::Pause { target }).await?;
        Ok(())
    }

    pub async fn stop(&self, target: Target) -> Result<(), ClientError> {
        self.execute(Command::Stop { target }).await?;
        Ok(())
    }

    /// Clears a layer, or a whole channel when `target` has no layer.
    pub async fn clear(&self, target: Target) -> Result<(), ClientError> {
        self.execute(Command::Clear { target }).await?;
        Ok(())
    }

    /// Clears a channel and resets its mixer.
    pub async fn clear_channel(&self, channel: u32) -> Result<(), ClientError> {
        let target = Target::channel(channel);
        self.execute(Command::Clear { target }).await?;
        self.execute(Command::Mixer {
            target,
            op: MixerOp::Clear,
        })
        .await?;
        Ok(())
    }

    pub async fn mixer(&self, target: Target, op: MixerOp) -> Result<(), ClientError> {
        self.execute(Command::Mixer { target, op }).await?;
        Ok(())
    }

    // =========================================================================
    // Templates
    // =========================================================================

    pub async fn cg(&self, target: Target, op: CgOp) -> Result<AssembledResponse, ClientError> {
        self.execute(Command::Cg { target, op }).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Lists media files.
    pub async fn cls(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.execute(Command::Cls { directory: None }).await?.body)
    }

    /// Lists templates.
    pub async fn tls(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.execute(Command::Tls { directory: None }).await?.body)
    }

    /// Returns the metadata line of a media file.
    pub async fn cinf(&self, name: &str) -> Result<Vec<String>, ClientError> {
        let command = Command::Cinf {
            name: name.to_string(),
        };
        Ok(self.execute(command).await?.body)
    }

    /// Returns the server version.
    pub async fn version(&self) -> Result<String, ClientError> {
        let response = self.execute(Command::Version { component: None }).await?;
        Ok(response.data().unwrap_or_default().to_string())
    }

    /// Returns channel information, or information on one channel/layer.
    pub async fn info(&self, target: Option<Target>) -> Result<Vec<String>, ClientError> {
        Ok(self.execute(Command::Info { target }).await?.body)
    }

    pub async fn info_system(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.execute(Command::InfoSystem).await?.body)
    }

    pub async fn data_list(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.execute(Command::DataList).await?.body)
    }

    pub async fn thumbnail_list(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.execute(Command::ThumbnailList).await?.body)
    }
}
