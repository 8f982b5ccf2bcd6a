#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose remainder is kept verbatim under `text`.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "filter",
        action: "edit",
    },
    CommandSpec {
        command: "preset",
        action: "apply_preset",
    },
    CommandSpec {
        command: "animate",
        action: "animate",
    },
    CommandSpec {
        command: "key",
        action: "select_credential",
    },
    CommandSpec {
        command: "mode",
        action: "set_mode",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "open",
        action: "open_image",
    },
    CommandSpec {
        command: "save",
        action: "save_image",
    },
    CommandSpec {
        command: "save_video",
        action: "save_video",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "presets",
        action: "list_presets",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "new",
        action: "new_image",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "wait",
        action: "wait_animation",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
];

pub(crate) const REVERT_COMMAND: CommandSpec = CommandSpec {
    command: "revert",
    action: "revert",
};

pub(crate) const STRAIGHTEN_COMMAND: CommandSpec = CommandSpec {
    command: "straighten",
    action: "straighten",
};

pub(crate) const ADJUST_COMMAND: CommandSpec = CommandSpec {
    command: "adjust",
    action: "adjust",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "<instruction>",
    "/filter",
    "/preset",
    "/presets",
    "/adjust",
    "/straighten",
    "/revert",
    "/history",
    "/reset",
    "/new",
    "/open",
    "/mode",
    "/animate",
    "/wait",
    "/status",
    "/key",
    "/save",
    "/save_video",
    "/help",
    "/quit",
];
