//! Command bar integration.
//!
//! A command bar is a small toolbar of buttons hosted by the application.
//! [`PlayerCmd`] keeps one in sync with the remote player: it builds the
//! buttons from the negotiated actions, refreshes them as state changes,
//! and maps button labels back onto player [`Command`]s.

use serde::{Deserialize, Serialize};

use crate::{
    events::Event,
    player::Command,
    protocol::{Action, ActionDescriptor, PlaybackState},
};

/// Default control identifier.
pub const DEFAULT_ID: &str = "playercmd";

/// Step by which the volume buttons change the volume.
pub const VOLUME_STEP: i64 = 5;

/// How a host applies a [`CmdBarControl`].
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    /// Replace the control.
    #[default]
    Update,
    /// Merge the given buttons into the existing control by `id`.
    Refresh,
    /// Take the control down.
    Remove,
}

#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glyphicon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Script to run on click.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click: Option<String>,

    /// CSS classes; a leading `!` removes the class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<String>,
}

impl Button {
    fn new(id: &str, glyphicon: &str, name: &str) -> Self {
        Self {
            id: id.to_owned(),
            glyphicon: Some(glyphicon.to_owned()),
            name: Some(name.to_owned()),
            ..Self::default()
        }
    }
}

/// A message to the command bar host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdBarControl {
    pub enabled: bool,
    pub action: ControlAction,
    #[serde(default)]
    pub groups: Vec<Vec<Button>>,
    /// Names of the scripts the buttons call.
    #[serde(default)]
    pub scripts: Vec<String>,
}

impl CmdBarControl {
    #[must_use]
    pub fn new(enabled: bool, action: ControlAction) -> Self {
        Self {
            enabled,
            action,
            groups: Vec::new(),
            scripts: Vec::new(),
        }
    }

    pub fn add_group(&mut self, buttons: Vec<Button>) {
        self.groups.push(buttons);
    }

    pub fn add_script(&mut self, name: &str) {
        if !self.scripts.iter().any(|script| script == name) {
            self.scripts.push(name.to_owned());
        }
    }

    /// Finds a button by identifier across all groups.
    #[must_use]
    pub fn button(&self, id: &str) -> Option<&Button> {
        self.groups.iter().flatten().find(|button| button.id == id)
    }
}

/// Host of a command bar.
pub trait CmdBar {
    /// Loads a control message for the control `id`. `None` announces the
    /// control before anything is known about the player.
    fn load(&mut self, message: Option<&CmdBarControl>, id: &str);
}

/// Drives a [`CmdBar`] from player events.
#[derive(Debug)]
pub struct PlayerCmd<B> {
    cmdbar: B,
    id: String,
    state: PlaybackState,
    control: Option<CmdBarControl>,
}

impl<B: CmdBar> PlayerCmd<B> {
    pub fn new(mut cmdbar: B, id: impl Into<String>) -> Self {
        let id = id.into();
        cmdbar.load(None, &id);

        Self {
            cmdbar,
            id,
            state: PlaybackState::default(),
            control: None,
        }
    }

    #[must_use]
    pub fn cmdbar(&self) -> &B {
        &self.cmdbar
    }

    pub fn handle(&mut self, event: &Event) {
        match event {
            Event::ActionsAnnounced(actions) => self.set_actions(actions),
            Event::OptionsChanged { options, .. } => self.change_options(options),
            Event::StateChanged { state, .. } => self.change_state(state),
            Event::Disconnected => self.on_close(),
            _ => {}
        }
    }

    fn set_actions(&mut self, actions: &[ActionDescriptor]) {
        let mut message = CmdBarControl::new(true, ControlAction::Update);
        let mut transport = Vec::new();
        let mut options = Vec::new();
        let mut volume = Vec::new();

        for action in actions {
            match &action.method {
                Action::Next => transport.push(Button::new("next", "fast-forward", "next")),
                Action::Stop => transport.push(Button::new("stop", "stop", "stop")),
                Action::Pause => {
                    transport.push(Button::new("playpause", "play", "toggle play pause"));
                }
                Action::Options => {
                    for option in action.param_names() {
                        match option {
                            "random" => {
                                options.push(Button {
                                    click: Some(
                                        "toggleshuffle(!$(this).hasClass('btn-primary'));"
                                            .to_owned(),
                                    ),
                                    ..Button::new("shuffle", "random", "toggle shuffle")
                                });
                                message.add_script("toggleshuffle");
                            }
                            "loop" => {
                                options.push(Button {
                                    click: Some(
                                        "togglerepeat(!$(this).hasClass('btn-primary'));"
                                            .to_owned(),
                                    ),
                                    ..Button::new("repeat", "repeat", "toggle repeat")
                                });
                                message.add_script("togglerepeat");
                            }
                            _ => {}
                        }
                    }
                }
                Action::Volume => {
                    volume.push(Button::new("volume-down", "volume-down", "volume down"));
                    volume.push(Button::new("volume-up", "volume-up", "volume up"));
                }
                Action::Other(method) => debug!("no button for unknown action {method}"),
                _ => {}
            }
        }

        message.add_group(transport);
        message.add_group(options);
        message.add_group(volume);

        self.cmdbar.load(Some(&message), &self.id);
        self.control = Some(message);
    }

    fn change_options(&mut self, options: &[String]) {
        let buttons = options
            .iter()
            .filter_map(|option| {
                let (enabled, name) = match option.strip_prefix('!') {
                    Some(name) => (false, name),
                    None => (true, option.as_str()),
                };
                let id = match name {
                    "random" => "shuffle",
                    "loop" => "repeat",
                    _ => return None,
                };
                let classes = if enabled { "btn-primary" } else { "!btn-primary" };

                Some(Button {
                    id: id.to_owned(),
                    classes: Some(classes.to_owned()),
                    ..Button::default()
                })
            })
            .collect();

        let mut message = CmdBarControl::new(true, ControlAction::Refresh);
        message.add_group(buttons);
        self.cmdbar.load(Some(&message), &self.id);
    }

    fn change_state(&mut self, state: &PlaybackState) {
        self.state = state.clone();

        let message = match state {
            PlaybackState::Disconnected => CmdBarControl::new(true, ControlAction::Remove),
            state => {
                let glyphicon = if *state == PlaybackState::Play {
                    "glyphicon-pause"
                } else {
                    "glyphicon-play"
                };
                let mut message = CmdBarControl::new(true, ControlAction::Refresh);
                message.add_group(vec![Button {
                    id: "playpause".to_owned(),
                    glyphicon: Some(glyphicon.to_owned()),
                    ..Button::default()
                }]);
                message
            }
        };

        self.cmdbar.load(Some(&message), &self.id);
    }

    /// Takes down the whole control, including every button it added.
    fn on_close(&mut self) {
        let mut message = self.control.clone().unwrap_or_default();
        message.enabled = true;
        message.action = ControlAction::Remove;
        self.cmdbar.load(Some(&message), &self.id);
    }

    /// Maps a button label onto a player command.
    #[must_use]
    pub fn listen(&self, message: &str) -> Option<Command> {
        let command = match message {
            "toggle play pause" => {
                if self.state == PlaybackState::Play {
                    Command::Pause
                } else {
                    Command::Play
                }
            }
            "stop" => Command::Stop,
            "next" => Command::Next,
            "random on" => Command::Shuffle(true),
            "random off" => Command::Shuffle(false),
            "repeat on" => Command::Repeat(true),
            "repeat off" => Command::Repeat(false),
            "volume down" => Command::Volume(Some(-VOLUME_STEP)),
            "volume up" => Command::Volume(Some(VOLUME_STEP)),
            _ => return None,
        };

        Some(command)
    }
}
