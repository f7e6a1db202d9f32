use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use artbot_core::net::messages::{LogLevel, LogRecord};

/// Which stored lines a query wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    pub limit: usize,
    pub level: Option<LogLevel>,
}

impl LogQuery {
    fn matches(&self, record: &LogRecord) -> bool {
        self.level.is_none_or(|level| record.level == level)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogStats {
    pub stored: usize,
    pub received: u64,
    pub evicted: u64,
}

/// Per-robot ring buffers of agent log lines.
#[derive(Debug)]
pub struct LogBook {
    capacity: usize,
    by_robot: HashMap<String, VecDeque<LogRecord>>,
    received: u64,
    evicted: u64,
}

impl LogBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            by_robot: HashMap::new(),
            received: 0,
            evicted: 0,
        }
    }

    pub fn push(&mut self, record: LogRecord) {
        let ring = self.by_robot.entry(record.robot_id.clone()).or_default();
        if ring.len() == self.capacity {
            ring.pop_front();
            self.evicted += 1;
        }
        ring.push_back(record);
        self.received += 1;
    }

    /// Newest first.
    pub fn for_robot(&self, robot_id: &str, query: LogQuery) -> Vec<LogRecord> {
        self.by_robot
            .get(robot_id)
            .map(|ring| {
                ring.iter()
                    .rev()
                    .filter(|r| query.matches(r))
                    .take(query.limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Newest first across every robot.
    pub fn recent(&self, query: LogQuery) -> Vec<LogRecord> {
        let mut all: Vec<&LogRecord> = self
            .by_robot
            .values()
            .flat_map(|ring| ring.iter().rev())
            .filter(|r| query.matches(r))
            .collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.into_iter().take(query.limit).cloned().collect()
    }

    pub fn forget(&mut self, robot_id: &str) {
        self.by_robot.remove(robot_id);
    }

    pub fn stats(&self) -> LogStats {
        LogStats {
            stored: self.by_robot.values().map(VecDeque::len).sum(),
            received: self.received,
            evicted: self.evicted,
        }
    }
}
