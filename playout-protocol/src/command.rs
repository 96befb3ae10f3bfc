//! Typed AMCP commands.
//!
//! Each variant carries only its own parameters. [`Command::encode`] turns a
//! command into its wire line (without terminator) and validates parameters on
//! the way; [`Command::parse`] reads a wire line back.

use crate::error::EncodingError;
use crate::params::{check_param, check_text, check_word, tokenize, LineBuilder, Param, Token};
use crate::status::CommandKind;
use std::fmt;
use std::str::FromStr;

/// A channel, optionally narrowed to one layer. Written `1` or `1-10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    pub channel: u32,
    pub layer: Option<u32>,
}

impl Target {
    pub fn channel(channel: u32) -> Self {
        Self {
            channel,
            layer: None,
        }
    }

    pub fn layer(channel: u32, layer: u32) -> Self {
        Self {
            channel,
            layer: Some(layer),
        }
    }

    fn validate(&self, command: &'static str) -> Result<(), EncodingError> {
        if self.channel == 0 {
            return Err(EncodingError::invalid(
                command,
                "channel",
                "must be a positive integer",
            ));
        }
        if self.layer == Some(0) {
            return Err(EncodingError::invalid(
                command,
                "layer",
                "must be a positive integer",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.layer {
            Some(layer) => write!(f, "{}-{}", self.channel, layer),
            None => write!(f, "{}", self.channel),
        }
    }
}

impl FromStr for Target {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || EncodingError::parse(format!("invalid channel/layer {:?}", s));
        match s.split_once('-') {
            Some((channel, layer)) => Ok(Target::layer(
                channel.parse().map_err(|_| bad())?,
                layer.parse().map_err(|_| bad())?,
            )),
            None => Ok(Target::channel(s.parse().map_err(|_| bad())?)),
        }
    }
}

/// Transition types understood by PLAY, LOAD and LOADBG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Cut,
    Mix,
    Push,
    Wipe,
    Slide,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Cut => "CUT",
            TransitionKind::Mix => "MIX",
            TransitionKind::Push => "PUSH",
            TransitionKind::Wipe => "WIPE",
            TransitionKind::Slide => "SLIDE",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "CUT" => Some(TransitionKind::Cut),
            "MIX" => Some(TransitionKind::Mix),
            "PUSH" => Some(TransitionKind::Push),
            "WIPE" => Some(TransitionKind::Wipe),
            "SLIDE" => Some(TransitionKind::Slide),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Left,
    #[default]
    Right,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Left => "LEFT",
            Direction::Right => "RIGHT",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "LEFT" => Some(Direction::Left),
            "RIGHT" => Some(Direction::Right),
            _ => None,
        }
    }
}

pub const DEFAULT_TWEEN: &str = "LINEAR";

/// A transition into the new clip. Duration is in frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub kind: TransitionKind,
    pub duration: u32,
    pub tween: String,
    pub direction: Direction,
}

impl Transition {
    pub fn new(kind: TransitionKind, duration: u32) -> Self {
        Self {
            kind,
            duration,
            tween: DEFAULT_TWEEN.to_string(),
            direction: Direction::default(),
        }
    }

    pub fn with_tween(mut self, tween: impl Into<String>) -> Self {
        self.tween = tween.into();
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

/// Options shared by LOAD, LOADBG and PLAY.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayOptions {
    pub looping: bool,
    pub transition: Option<Transition>,
    pub seek: Option<u32>,
    pub length: Option<u32>,
    pub auto: bool,
}

impl PlayOptions {
    fn validate(&self, command: &'static str) -> Result<(), EncodingError> {
        if let Some(transition) = &self.transition {
            check_word(command, "tween", &transition.tween)?;
        }
        Ok(())
    }

    fn write(&self, line: &mut LineBuilder) {
        if self.looping {
            line.word("LOOP");
        }
        if let Some(t) = &self.transition {
            line.word(t.kind.as_str())
                .uint(t.duration)
                .word(&t.tween)
                .word(t.direction.as_str());
        }
        if let Some(seek) = self.seek {
            line.word("SEEK").uint(seek);
        }
        if let Some(length) = self.length {
            line.word("LENGTH").uint(length);
        }
        if self.auto {
            line.word("AUTO");
        }
    }

    fn is_keyword(token: &Token) -> bool {
        match token {
            Token::Quoted(_) => false,
            Token::Word(w) => {
                TransitionKind::from_keyword(w).is_some()
                    || ["LOOP", "SEEK", "LENGTH", "AUTO"]
                        .iter()
                        .any(|k| k.eq_ignore_ascii_case(w))
            }
        }
    }

    fn parse(args: &mut Args<'_>) -> Result<Self, EncodingError> {
        let mut options = PlayOptions::default();
        while let Some(token) = args.next() {
            let Token::Word(word) = token else {
                return Err(EncodingError::parse(format!(
                    "unexpected quoted parameter {:?}",
                    token.text()
                )));
            };
            if word.eq_ignore_ascii_case("LOOP") {
                options.looping = true;
            } else if word.eq_ignore_ascii_case("AUTO") {
                options.auto = true;
            } else if word.eq_ignore_ascii_case("SEEK") {
                options.seek = Some(args.uint("seek")?);
            } else if word.eq_ignore_ascii_case("LENGTH") {
                options.length = Some(args.uint("length")?);
            } else if let Some(kind) = TransitionKind::from_keyword(word) {
                let mut transition = Transition::new(kind, args.uint("duration")?);
                if let Some(tween) = args.take_if(|t| {
                    !t.is_quoted()
                        && Direction::from_keyword(t.text()).is_none()
                        && !PlayOptions::is_keyword(t)
                }) {
                    transition.tween = tween.text().to_string();
                }
                if let Some(direction) = args.take_if(|t| {
                    !t.is_quoted() && Direction::from_keyword(t.text()).is_some()
                }) {
                    transition.direction =
                        Direction::from_keyword(direction.text()).unwrap_or_default();
                }
                options.transition = Some(transition);
            } else {
                return Err(EncodingError::parse(format!("unexpected option {:?}", word)));
            }
        }
        Ok(options)
    }
}

/// Mixer properties that take a level and an optional tween.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerProperty {
    Opacity,
    Volume,
    Contrast,
    Brightness,
    Saturation,
}

impl MixerProperty {
    pub fn as_str(&self) -> &'static str {
        match self {
            MixerProperty::Opacity => "OPACITY",
            MixerProperty::Volume => "VOLUME",
            MixerProperty::Contrast => "CONTRAST",
            MixerProperty::Brightness => "BRIGHTNESS",
            MixerProperty::Saturation => "SATURATION",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "OPACITY" => Some(MixerProperty::Opacity),
            "VOLUME" => Some(MixerProperty::Volume),
            "CONTRAST" => Some(MixerProperty::Contrast),
            "BRIGHTNESS" => Some(MixerProperty::Brightness),
            "SATURATION" => Some(MixerProperty::Saturation),
            _ => None,
        }
    }

    /// Largest accepted level.
    fn max(&self) -> f64 {
        match self {
            MixerProperty::Opacity => 1.0,
            _ => 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MixerOp {
    /// `MIXER 1-10 OPACITY 0.5 25 LINEAR [DEFER]`
    Level {
        property: MixerProperty,
        value: f64,
        duration: u32,
        tween: String,
        defer: bool,
    },
    Clear,
    /// Applies deferred mixer changes; channel-wide.
    Commit,
}

impl MixerOp {
    pub fn level(property: MixerProperty, value: f64) -> Self {
        MixerOp::Level {
            property,
            value,
            duration: 0,
            tween: DEFAULT_TWEEN.to_string(),
            defer: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CgOp {
    Add {
        flash_layer: u32,
        template: String,
        play_on_load: bool,
        data: Option<String>,
    },
    Play { flash_layer: u32 },
    Stop { flash_layer: u32 },
    Next { flash_layer: u32 },
    Remove { flash_layer: u32 },
    Clear,
    Update { flash_layer: u32, data: String },
    Invoke { flash_layer: u32, method: String },
    Info { flash_layer: Option<u32> },
}

/// An AMCP command with its typed parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Load {
        target: Target,
        clip: String,
        options: PlayOptions,
    },
    LoadBg {
        target: Target,
        clip: String,
        options: PlayOptions,
    },
    /// Without a clip, plays whatever is loaded on the layer.
    Play {
        target: Target,
        clip: Option<String>,
        options: PlayOptions,
    },
    Pause {
        target: Target,
    },
    Stop {
        target: Target,
    },
    Clear {
        target: Target,
    },
    Call {
        target: Target,
        property: String,
        value: Param,
    },
    Swap {
        first: Target,
        second: Target,
    },
    Add {
        channel: u32,
        consumer: String,
        params: Vec<Param>,
    },
    Remove {
        channel: u32,
        consumer: String,
        params: Vec<Param>,
    },
    Set {
        channel: u32,
        variable: String,
        value: Param,
    },
    Mixer {
        target: Target,
        op: MixerOp,
    },
    Cg {
        target: Target,
        op: CgOp,
    },
    Cls {
        directory: Option<String>,
    },
    Tls {
        directory: Option<String>,
    },
    Cinf {
        name: String,
    },
    Version {
        component: Option<String>,
    },
    Info {
        target: Option<Target>,
    },
    InfoSystem,
    DataList,
    DataRetrieve {
        name: String,
    },
    ThumbnailList,
    ThumbnailRetrieve {
        name: String,
    },
    /// A line passed through untouched.
    Custom {
        line: String,
    },
}

impl Command {
    pub fn load(target: Target, clip: impl Into<String>) -> Self {
        Command::Load {
            target,
            clip: clip.into(),
            options: PlayOptions::default(),
        }
    }

    pub fn play(target: Target) -> Self {
        Command::Play {
            target,
            clip: None,
            options: PlayOptions::default(),
        }
    }

    pub fn play_clip(target: Target, clip: impl Into<String>, options: PlayOptions) -> Self {
        Command::Play {
            target,
            clip: Some(clip.into()),
            options,
        }
    }

    pub fn custom(line: impl Into<String>) -> Self {
        Command::Custom { line: line.into() }
    }

    /// Returns the kind, as echoed back in the response header.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Load { .. } => CommandKind::Load,
            Command::LoadBg { .. } => CommandKind::LoadBg,
            Command::Play { .. } => CommandKind::Play,
            Command::Pause { .. } => CommandKind::Pause,
            Command::Stop { .. } => CommandKind::Stop,
            Command::Clear { .. } => CommandKind::Clear,
            Command::Call { .. } => CommandKind::Call,
            Command::Swap { .. } => CommandKind::Swap,
            Command::Add { .. } => CommandKind::Add,
            Command::Remove { .. } => CommandKind::Remove,
            Command::Set { .. } => CommandKind::Set,
            Command::Mixer { .. } => CommandKind::Mixer,
            Command::Cg { .. } => CommandKind::Cg,
            Command::Cls { .. } => CommandKind::Cls,
            Command::Tls { .. } => CommandKind::Tls,
            Command::Cinf { .. } => CommandKind::Cinf,
            Command::Version { .. } => CommandKind::Version,
            Command::Info { .. } => CommandKind::Info,
            Command::InfoSystem => CommandKind::InfoSystem,
            Command::DataList => CommandKind::DataList,
            Command::DataRetrieve { .. } => CommandKind::DataRetrieve,
            Command::ThumbnailList => CommandKind::ThumbnailList,
            Command::ThumbnailRetrieve { .. } => CommandKind::ThumbnailRetrieve,
            Command::Custom { line } => {
                let words: Vec<&str> = line.split_whitespace().take(2).collect();
                CommandKind::match_tokens(&words).0
            }
        }
    }

    /// Renders the wire line, without terminator.
    pub fn encode(&self) -> Result<String, EncodingError> {
        let name = self.kind().wire_name();
        let mut line = LineBuilder::new(name);

        match self {
            Command::Load {
                target,
                clip,
                options,
            }
            | Command::LoadBg {
                target,
                clip,
                options,
            } => {
                target.validate(name)?;
                check_text(name, "clip", clip, true)?;
                options.validate(name)?;
                line.word(&target.to_string()).text(clip);
                options.write(&mut line);
            }

            Command::Play {
                target,
                clip,
                options,
            } => {
                target.validate(name)?;
                line.word(&target.to_string());
                if let Some(clip) = clip {
                    check_text(name, "clip", clip, true)?;
                    line.text(clip);
                }
                options.validate(name)?;
                options.write(&mut line);
            }

            Command::Pause { target } | Command::Stop { target } | Command::Clear { target } => {
                target.validate(name)?;
                line.word(&target.to_string());
            }

            Command::Call {
                target,
                property,
                value,
            } => {
                target.validate(name)?;
                check_word(name, "property", property)?;
                check_param(name, "value", value)?;
                line.word(&target.to_string()).word(property).param(value);
            }

            Command::Swap { first, second } => {
                first.validate(name)?;
                second.validate(name)?;
                line.word(&first.to_string()).word(&second.to_string());
            }

            Command::Add {
                channel,
                consumer,
                params,
            }
            | Command::Remove {
                channel,
                consumer,
                params,
            } => {
                Target::channel(*channel).validate(name)?;
                check_word(name, "consumer", consumer)?;
                line.uint(*channel).word(consumer);
                for param in params {
                    check_param(name, "params", param)?;
                    line.param(param);
                }
            }

            Command::Set {
                channel,
                variable,
                value,
            } => {
                Target::channel(*channel).validate(name)?;
                check_word(name, "variable", variable)?;
                check_param(name, "value", value)?;
                line.uint(*channel).word(variable).param(value);
            }

            Command::Mixer { target, op } => {
                target.validate(name)?;
                match op {
                    MixerOp::Level {
                        property,
                        value,
                        duration,
                        tween,
                        defer,
                    } => {
                        if !value.is_finite() || *value < 0.0 || *value > property.max() {
                            return Err(EncodingError::invalid(
                                name,
                                "value",
                                format!(
                                    "{} must be between 0 and {}",
                                    property.as_str(),
                                    property.max()
                                ),
                            ));
                        }
                        check_word(name, "tween", tween)?;
                        line.word(&target.to_string())
                            .word(property.as_str())
                            .float(*value)
                            .uint(*duration)
                            .word(tween);
                        if *defer {
                            line.word("DEFER");
                        }
                    }
                    MixerOp::Clear => {
                        line.word(&target.to_string()).word("CLEAR");
                    }
                    MixerOp::Commit => {
                        if target.layer.is_some() {
                            return Err(EncodingError::invalid(
                                name,
                                "layer",
                                "COMMIT applies to a whole channel",
                            ));
                        }
                        line.word(&target.to_string()).word("COMMIT");
                    }
                }
            }

            Command::Cg { target, op } => {
                target.validate(name)?;
                line.word(&target.to_string());
                match op {
                    CgOp::Add {
                        flash_layer,
                        template,
                        play_on_load,
                        data,
                    } => {
                        check_text(name, "template", template, true)?;
                        // The play-on-load flag is a digit in the CG ADD grammar.
                        line.word("ADD")
                            .uint(*flash_layer)
                            .text(template)
                            .uint(u32::from(*play_on_load));
                        if let Some(data) = data {
                            check_text(name, "data", data, false)?;
                            line.text(data);
                        }
                    }
                    CgOp::Play { flash_layer } => {
                        line.word("PLAY").uint(*flash_layer);
                    }
                    CgOp::Stop { flash_layer } => {
                        line.word("STOP").uint(*flash_layer);
                    }
                    CgOp::Next { flash_layer } => {
                        line.word("NEXT").uint(*flash_layer);
                    }
                    CgOp::Remove { flash_layer } => {
                        line.word("REMOVE").uint(*flash_layer);
                    }
                    CgOp::Clear => {
                        line.word("CLEAR");
                    }
                    CgOp::Update { flash_layer, data } => {
                        check_text(name, "data", data, false)?;
                        line.word("UPDATE").uint(*flash_layer).text(data);
                    }
                    CgOp::Invoke {
                        flash_layer,
                        method,
                    } => {
                        check_text(name, "method", method, true)?;
                        line.word("INVOKE").uint(*flash_layer).text(method);
                    }
                    CgOp::Info { flash_layer } => {
                        line.word("INFO");
                        if let Some(flash_layer) = flash_layer {
                            line.uint(*flash_layer);
                        }
                    }
                }
            }

            Command::Cls { directory } | Command::Tls { directory } => {
                if let Some(directory) = directory {
                    check_text(name, "directory", directory, true)?;
                    line.text(directory);
                }
            }

            Command::Cinf { name: clip } => {
                check_text(name, "name", clip, true)?;
                line.text(clip);
            }

            Command::Version { component } => {
                if let Some(component) = component {
                    check_word(name, "component", component)?;
                    line.word(component);
                }
            }

            Command::Info { target } => {
                if let Some(target) = target {
                    target.validate(name)?;
                    line.word(&target.to_string());
                }
            }

            Command::InfoSystem | Command::DataList | Command::ThumbnailList => {}

            Command::DataRetrieve { name: item } | Command::ThumbnailRetrieve { name: item } => {
                check_text(name, "name", item, true)?;
                line.text(item);
            }

            Command::Custom { line: raw } => {
                check_text("custom command", "line", raw.trim(), true)?;
                if raw.contains('\n') {
                    return Err(EncodingError::invalid(
                        "custom command",
                        "line",
                        "must be a single line",
                    ));
                }
                return Ok(raw.trim().to_string());
            }
        }

        Ok(line.finish())
    }

    /// Parses a wire line (terminator optional) into a command.
    ///
    /// Lines that do not start with a known command name become
    /// [`Command::Custom`].
    pub fn parse(line: &str) -> Result<Self, EncodingError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let tokens = tokenize(line)?;
        if tokens.is_empty() {
            return Err(EncodingError::parse("empty command line"));
        }

        let head: Vec<&str> = tokens
            .iter()
            .take(2)
            .take_while(|t| !t.is_quoted())
            .map(Token::text)
            .collect();
        let (kind, span) = CommandKind::match_tokens(&head);
        let mut args = Args::new(&tokens[span..]);

        let command = match kind {
            CommandKind::Load | CommandKind::LoadBg => {
                let target = args.target()?;
                let clip = args.text("clip")?;
                let options = PlayOptions::parse(&mut args)?;
                if kind == CommandKind::Load {
                    Command::Load {
                        target,
                        clip,
                        options,
                    }
                } else {
                    Command::LoadBg {
                        target,
                        clip,
                        options,
                    }
                }
            }
            CommandKind::Play => {
                let target = args.target()?;
                let clip = args
                    .take_if(|t| t.is_quoted() || !PlayOptions::is_keyword(t))
                    .map(|t| t.text().to_string());
                let options = PlayOptions::parse(&mut args)?;
                Command::Play {
                    target,
                    clip,
                    options,
                }
            }
            CommandKind::Pause => Command::Pause {
                target: args.target()?,
            },
            CommandKind::Stop => Command::Stop {
                target: args.target()?,
            },
            CommandKind::Clear => Command::Clear {
                target: args.target()?,
            },
            CommandKind::Call => Command::Call {
                target: args.target()?,
                property: args.word("property")?,
                value: args.param("value")?,
            },
            CommandKind::Swap => Command::Swap {
                first: args.target()?,
                second: args.target()?,
            },
            CommandKind::Add | CommandKind::Remove => {
                let channel = args.uint("channel")?;
                let consumer = args.word("consumer")?;
                let params = args.rest().iter().map(Param::from_token).collect();
                if kind == CommandKind::Add {
                    Command::Add {
                        channel,
                        consumer,
                        params,
                    }
                } else {
                    Command::Remove {
                        channel,
                        consumer,
                        params,
                    }
                }
            }
            CommandKind::Set => Command::Set {
                channel: args.uint("channel")?,
                variable: args.word("variable")?,
                value: args.param("value")?,
            },
            CommandKind::Mixer => {
                let target = args.target()?;
                let keyword = args.word("mixer operation")?;
                let op = if keyword.eq_ignore_ascii_case("CLEAR") {
                    MixerOp::Clear
                } else if keyword.eq_ignore_ascii_case("COMMIT") {
                    MixerOp::Commit
                } else if let Some(property) = MixerProperty::from_keyword(&keyword) {
                    let value = args.float("value")?;
                    let duration = args.optional_uint("duration")?.unwrap_or(0);
                    let tween = args
                        .take_if(|t| !t.is_quoted() && !t.is_keyword("DEFER"))
                        .map(|t| t.text().to_string())
                        .unwrap_or_else(|| DEFAULT_TWEEN.to_string());
                    let defer = args.take_if(|t| t.is_keyword("DEFER")).is_some();
                    MixerOp::Level {
                        property,
                        value,
                        duration,
                        tween,
                        defer,
                    }
                } else {
                    return Err(EncodingError::parse(format!(
                        "unsupported MIXER operation {:?}",
                        keyword
                    )));
                };
                Command::Mixer { target, op }
            }
            CommandKind::Cg => {
                let target = args.target()?;
                let keyword = args.word("CG operation")?.to_ascii_uppercase();
                let op = match keyword.as_str() {
                    "ADD" => CgOp::Add {
                        flash_layer: args.uint("flash layer")?,
                        template: args.text("template")?,
                        play_on_load: args.uint("play on load")? != 0,
                        data: args.next().map(|t| t.text().to_string()),
                    },
                    "PLAY" => CgOp::Play {
                        flash_layer: args.uint("flash layer")?,
                    },
                    "STOP" => CgOp::Stop {
                        flash_layer: args.uint("flash layer")?,
                    },
                    "NEXT" => CgOp::Next {
                        flash_layer: args.uint("flash layer")?,
                    },
                    "REMOVE" => CgOp::Remove {
                        flash_layer: args.uint("flash layer")?,
                    },
                    "CLEAR" => CgOp::Clear,
                    "UPDATE" => CgOp::Update {
                        flash_layer: args.uint("flash layer")?,
                        data: args.text("data")?,
                    },
                    "INVOKE" => CgOp::Invoke {
                        flash_layer: args.uint("flash layer")?,
                        method: args.text("method")?,
                    },
                    "INFO" => CgOp::Info {
                        flash_layer: args.optional_uint("flash layer")?,
                    },
                    other => {
                        return Err(EncodingError::parse(format!(
                            "unsupported CG operation {:?}",
                            other
                        )))
                    }
                };
                Command::Cg { target, op }
            }
            CommandKind::Cls => Command::Cls {
                directory: args.next().map(|t| t.text().to_string()),
            },
            CommandKind::Tls => Command::Tls {
                directory: args.next().map(|t| t.text().to_string()),
            },
            CommandKind::Cinf => Command::Cinf {
                name: args.text("name")?,
            },
            CommandKind::Version => Command::Version {
                component: args.next().map(|t| t.text().to_string()),
            },
            CommandKind::Info => Command::Info {
                target: match args.next() {
                    Some(token) => Some(token.text().parse()?),
                    None => None,
                },
            },
            CommandKind::InfoSystem => Command::InfoSystem,
            CommandKind::DataList => Command::DataList,
            CommandKind::DataRetrieve => Command::DataRetrieve {
                name: args.text("name")?,
            },
            CommandKind::ThumbnailList => Command::ThumbnailList,
            CommandKind::ThumbnailRetrieve => Command::ThumbnailRetrieve {
                name: args.text("name")?,
            },
            CommandKind::Error | CommandKind::Unknown => {
                return Ok(Command::custom(line.trim()));
            }
        };

        args.finish()?;
        Ok(command)
    }
}

impl FromStr for Command {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::parse(s)
    }
}

/// Cursor over the parameter tokens of a line being parsed.
struct Args<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Args<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn take_if(&mut self, pred: impl Fn(&Token) -> bool) -> Option<&'a Token> {
        match self.tokens.get(self.pos) {
            Some(token) if pred(token) => {
                self.pos += 1;
                Some(token)
            }
            _ => None,
        }
    }

    fn rest(&mut self) -> &'a [Token] {
        let rest = &self.tokens[self.pos..];
        self.pos = self.tokens.len();
        rest
    }

    fn required(&mut self, what: &str) -> Result<&'a Token, EncodingError> {
        self.next()
            .ok_or_else(|| EncodingError::parse(format!("missing {}", what)))
    }

    fn target(&mut self) -> Result<Target, EncodingError> {
        self.required("channel")?.text().parse()
    }

    fn text(&mut self, what: &str) -> Result<String, EncodingError> {
        Ok(self.required(what)?.text().to_string())
    }

    fn word(&mut self, what: &str) -> Result<String, EncodingError> {
        match self.required(what)? {
            Token::Word(word) => Ok(word.clone()),
            Token::Quoted(text) => Err(EncodingError::parse(format!(
                "expected {} keyword, found quoted {:?}",
                what, text
            ))),
        }
    }

    fn uint(&mut self, what: &str) -> Result<u32, EncodingError> {
        let token = self.required(what)?;
        token
            .text()
            .parse()
            .map_err(|_| EncodingError::parse(format!("invalid {} {:?}", what, token.text())))
    }

    fn optional_uint(&mut self, what: &str) -> Result<Option<u32>, EncodingError> {
        match self.take_if(|t| !t.is_quoted() && t.text().parse::<u32>().is_ok()) {
            Some(_) => {
                self.pos -= 1;
                self.uint(what).map(Some)
            }
            None => Ok(None),
        }
    }

    fn float(&mut self, what: &str) -> Result<f64, EncodingError> {
        let token = self.required(what)?;
        token
            .text()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| EncodingError::parse(format!("invalid {} {:?}", what, token.text())))
    }

    fn param(&mut self, what: &str) -> Result<Param, EncodingError> {
        Ok(Param::from_token(self.required(what)?))
    }

    fn finish(&self) -> Result<(), EncodingError> {
        match self.tokens.get(self.pos) {
            Some(extra) => Err(EncodingError::parse(format!(
                "unexpected parameter {:?}",
                extra.text()
            ))),
            None => Ok(()),
        }
    }
}
