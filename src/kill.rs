//! C9: translates server kill directives into targeted or wholesale
//! termination of active runs. Killed runs are reported once via the returned
//! list and are never re-delivered through the harvest loop.

#[derive(Debug, Clone)]
pub struct ToBeKilled {
    pub result_id: i64,
    pub organization_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KilledResult {
    pub result_id: i64,
    pub task_id: i64,
    pub parent_id: Option<i64>,
}
