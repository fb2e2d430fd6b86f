/// Names of one published status field across the outer surfaces.
#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub key: &'static str,
    pub metric: &'static str,
}

pub const RPM: Tag = Tag {
    key: "rpm",
    metric: "spindle_rpm",
};

pub const ENGINE_ENERGIZED: Tag = Tag {
    key: "engine_energized",
    metric: "spindle_engine_energized",
};

pub const MAIN_POWER: Tag = Tag {
    key: "main_power",
    metric: "spindle_main_power",
};

pub const DIRECTION_FORWARD: Tag = Tag {
    key: "direction_forward",
    metric: "spindle_direction_forward",
};

pub const DIRECTION_BACKWARD: Tag = Tag {
    key: "direction_backward",
    metric: "spindle_direction_backward",
};

pub const LIGHT: Tag = Tag {
    key: "light",
    metric: "spindle_light",
};

pub const BACKLIGHT: Tag = Tag {
    key: "backlight",
    metric: "spindle_backlight",
};

pub const LUBRICATION: Tag = Tag {
    key: "lubrication",
    metric: "spindle_lubrication",
};

pub const WARNING: Tag = Tag {
    key: "warning",
    metric: "spindle_warning",
};

pub const EMERGENCY: Tag = Tag {
    key: "emergency",
    metric: "spindle_emergency_stop",
};

pub const ALL: [Tag; 10] = [
    RPM,
    ENGINE_ENERGIZED,
    MAIN_POWER,
    DIRECTION_FORWARD,
    DIRECTION_BACKWARD,
    LIGHT,
    BACKLIGHT,
    LUBRICATION,
    WARNING,
    EMERGENCY,
];
