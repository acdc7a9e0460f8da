pub const TOPIC_CONTROLLER_STATE: &str = "lightctl/controller/state";

pub const TOPIC_CMD_SCHEDULER: &str = "lightctl/cmnd/scheduler";
pub const TOPIC_CMD_OVERRIDE: &str = "lightctl/cmnd/override";
pub const TOPIC_CMD_SCHEDULE: &str = "lightctl/cmnd/schedule";
