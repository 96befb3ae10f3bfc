//! Rundown items and the AMCP commands each playout action sends.

use playout_protocol::{
    CgOp, Command, Direction, MixerOp, PlayOptions, Target, Transition, TransitionKind,
    DEFAULT_TWEEN,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// What an item puts on air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Image,
    Video,
    Template,
    Audio,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemKind::Image => "image",
            ItemKind::Video => "video",
            ItemKind::Template => "template",
            ItemKind::Audio => "audio",
        };
        f.pad(name)
    }
}

/// Transition as written in a rundown file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionSettings {
    pub kind: String,
    /// Frames.
    pub duration: u32,
    pub tween: String,
    pub direction: String,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            kind: "CUT".to_string(),
            duration: 0,
            tween: DEFAULT_TWEEN.to_string(),
            direction: "RIGHT".to_string(),
        }
    }
}

impl TransitionSettings {
    /// Converts to a protocol transition. A zero-length cut is no transition.
    pub fn to_transition(&self) -> Result<Option<Transition>, RundownError> {
        let kind = TransitionKind::from_keyword(&self.kind)
            .ok_or_else(|| RundownError::invalid(format!("unknown transition {:?}", self.kind)))?;
        let direction = Direction::from_keyword(&self.direction).ok_or_else(|| {
            RundownError::invalid(format!("unknown direction {:?}", self.direction))
        })?;
        if kind == TransitionKind::Cut && self.duration == 0 {
            return Ok(None);
        }
        Ok(Some(
            Transition::new(kind, self.duration)
                .with_tween(self.tween.clone())
                .with_direction(direction),
        ))
    }
}

fn default_channel() -> u32 {
    1
}

fn default_layer() -> u32 {
    10
}

fn default_flash_layer() -> u32 {
    1
}

/// One entry of a rundown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RundownItem {
    /// Device the item plays on.
    pub device: String,
    pub kind: ItemKind,
    /// Clip, image or template name.
    pub name: String,
    #[serde(default = "default_channel")]
    pub channel: u32,
    #[serde(default = "default_layer")]
    pub layer: u32,
    /// Template host layer.
    #[serde(default = "default_flash_layer")]
    pub flash_layer: u32,
    /// Play delay, in milliseconds or frames.
    #[serde(default)]
    pub delay: u64,
    #[serde(default)]
    pub transition: TransitionSettings,
    #[serde(default, rename = "loop")]
    pub looping: bool,
    /// Played by `next` instead of `play`.
    #[serde(default)]
    pub trigger_on_next: bool,
    /// Template data, passed to CG ADD.
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl RundownItem {
    pub fn target(&self) -> Target {
        Target::layer(self.channel, self.layer)
    }

    pub fn title(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub fn validate(&self) -> Result<(), RundownError> {
        if self.device.trim().is_empty() {
            return Err(RundownError::invalid("item has no device"));
        }
        if self.name.trim().is_empty() {
            return Err(RundownError::invalid("item has no name"));
        }
        if self.channel == 0 || self.layer == 0 {
            return Err(RundownError::invalid(format!(
                "{}: channel and layer must be positive",
                self.name
            )));
        }
        self.transition.to_transition()?;
        Ok(())
    }

    fn play_options(&self) -> Result<PlayOptions, RundownError> {
        Ok(PlayOptions {
            looping: self.looping && self.kind != ItemKind::Image,
            transition: self.transition.to_transition()?,
            ..Default::default()
        })
    }

    fn cg_add(&self, play_on_load: bool) -> Command {
        Command::Cg {
            target: self.target(),
            op: CgOp::Add {
                flash_layer: self.flash_layer,
                template: self.name.clone(),
                play_on_load,
                data: self.data.clone(),
            },
        }
    }

    /// Commands sent for `action`, given the item's current state. Empty when
    /// the action does nothing in that state.
    pub fn commands(&self, action: Action, state: ItemState) -> Result<Vec<Command>, RundownError> {
        let target = self.target();
        let template = self.kind == ItemKind::Template;

        let commands = match action {
            Action::Load if template => vec![self.cg_add(false)],
            Action::Load => vec![Command::Load {
                target,
                clip: self.name.clone(),
                options: self.play_options()?,
            }],
            Action::Play | Action::Next if template => {
                if state.loaded {
                    vec![Command::Cg {
                        target,
                        op: CgOp::Play {
                            flash_layer: self.flash_layer,
                        },
                    }]
                } else {
                    vec![self.cg_add(true)]
                }
            }
            Action::Play | Action::Next => {
                if state.loaded {
                    vec![Command::play(target)]
                } else {
                    vec![Command::play_clip(target, self.name.clone(), self.play_options()?)]
                }
            }
            Action::Pause if template || !state.playing => Vec::new(),
            Action::Pause if state.paused => vec![Command::play(target)],
            Action::Pause => vec![Command::Pause { target }],
            Action::Stop if template => vec![Command::Cg {
                target,
                op: CgOp::Stop {
                    flash_layer: self.flash_layer,
                },
            }],
            Action::Stop => vec![Command::Stop { target }],
            Action::Clear | Action::ClearVideolayer => vec![Command::Clear { target }],
            Action::ClearChannel => {
                let channel = Target::channel(self.channel);
                vec![
                    Command::Clear { target: channel },
                    Command::Mixer {
                        target: channel,
                        op: MixerOp::Clear,
                    },
                ]
            }
        };
        Ok(commands)
    }
}

/// Playout state of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ItemState {
    pub loaded: bool,
    pub paused: bool,
    pub playing: bool,
}

impl ItemState {
    /// State after `action` has been sent.
    pub fn after(self, action: Action) -> Self {
        match action {
            Action::Load => ItemState {
                loaded: true,
                paused: false,
                playing: false,
            },
            Action::Play | Action::Next => ItemState {
                loaded: false,
                paused: false,
                playing: true,
            },
            Action::Pause if self.playing => ItemState {
                paused: !self.paused,
                ..self
            },
            Action::Pause => self,
            Action::Stop | Action::Clear | Action::ClearVideolayer | Action::ClearChannel => {
                ItemState::default()
            }
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.playing && self.paused {
            "paused"
        } else if self.playing {
            "playing"
        } else if self.loaded {
            "loaded"
        } else {
            "idle"
        };
        f.pad(name)
    }
}

/// Playout actions on a rundown item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Load,
    Play,
    /// Toggles pause and resume while playing.
    Pause,
    Stop,
    /// Plays items marked trigger-on-next.
    Next,
    Clear,
    ClearVideolayer,
    ClearChannel,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Load => "load",
            Action::Play => "play",
            Action::Pause => "pause",
            Action::Stop => "stop",
            Action::Next => "next",
            Action::Clear => "clear",
            Action::ClearVideolayer => "clear-layer",
            Action::ClearChannel => "clear-channel",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = RundownError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "load" => Ok(Action::Load),
            "play" => Ok(Action::Play),
            "pause" => Ok(Action::Pause),
            "stop" => Ok(Action::Stop),
            "next" => Ok(Action::Next),
            "clear" => Ok(Action::Clear),
            "clear-layer" => Ok(Action::ClearVideolayer),
            "clear-channel" => Ok(Action::ClearChannel),
            other => Err(RundownError::invalid(format!("unknown action {:?}", other))),
        }
    }
}

/// An ordered list of items, loaded from a YAML file.
#[derive(Debug, Clone, Default)]
pub struct Rundown {
    pub items: Vec<RundownItem>,
}

impl Rundown {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RundownError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RundownError::Io(path.to_path_buf(), e))?;
        Self::from_yaml(&content).map_err(|e| match e {
            RundownError::Parse(_, message) => RundownError::Parse(path.to_path_buf(), message),
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, RundownError> {
        let items: Vec<RundownItem> = serde_yaml::from_str(content)
            .map_err(|e| RundownError::Parse(PathBuf::new(), e.to_string()))?;
        for item in &items {
            item.validate()?;
        }
        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Rundown errors.
#[derive(Debug, thiserror::Error)]
pub enum RundownError {
    #[error("failed to read '{}': {1}", .0.display())]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse rundown '{}': {1}", .0.display())]
    Parse(PathBuf, String),

    #[error("invalid rundown item: {0}")]
    InvalidItem(String),

    #[error("no item at position {0}")]
    NoSuchItem(usize),

    #[error(transparent)]
    Client(#[from] playout_client::ClientError),
}

impl RundownError {
    fn invalid(reason: impl Into<String>) -> Self {
        RundownError::InvalidItem(reason.into())
    }
}
