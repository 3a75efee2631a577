//! 脚本定时器表
//!
//! 支撑 `setTimeout` / `clearTimeout`。到期时间相同的定时器按创建顺序触发。

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

pub type TimerId = u64;

/// 最长延迟，超出的延迟被截断（2^31 - 1 毫秒）
pub const MAX_DELAY: Duration = Duration::from_millis(i32::MAX as u64);

#[derive(Debug)]
pub struct Timers<T> {
    next_id: TimerId,
    queue: BTreeMap<(Instant, TimerId), T>,
    deadlines: HashMap<TimerId, Instant>,
}

impl<T> Default for Timers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Timers<T> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// 安排在 `delay` 之后触发，延迟不超过 [`MAX_DELAY`]
    pub fn schedule(&mut self, now: Instant, delay: Duration, item: T) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        let deadline = now.checked_add(delay.min(MAX_DELAY)).unwrap_or(now);
        self.queue.insert((deadline, id), item);
        self.deadlines.insert(id, deadline);
        id
    }

    /// 取消定时器，返回被取消的条目
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let deadline = self.deadlines.remove(&id)?;
        self.queue.remove(&(deadline, id))
    }

    /// 取出所有在 `now` 之前到期的定时器
    pub fn take_due(&mut self, now: Instant) -> Vec<(TimerId, T)> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            let (deadline, id) = *entry.key();
            if deadline > now {
                break;
            }
            let item = entry.remove();
            self.deadlines.remove(&id);
            due.push((id, item));
        }
        due
    }

    /// 距离最近一个定时器到期还有多久
    pub fn next_due_in(&self, now: Instant) -> Option<Duration> {
        self.queue
            .keys()
            .next()
            .map(|(deadline, _)| deadline.saturating_duration_since(now))
    }

    /// 清空并返回全部条目
    pub fn clear(&mut self) -> Vec<T> {
        self.deadlines.clear();
        std::mem::take(&mut self.queue).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_order() {
        let now = Instant::now();
        let mut timers = Timers::new();
        timers.schedule(now, Duration::from_millis(20), "late");
        timers.schedule(now, Duration::ZERO, "first");
        timers.schedule(now, Duration::ZERO, "second");

        let due: Vec<_> = timers.take_due(now).into_iter().map(|(_, t)| t).collect();
        assert_eq!(due, vec!["first", "second"]);
        assert_eq!(timers.next_due_in(now), Some(Duration::from_millis(20)));

        let due = timers.take_due(now + Duration::from_millis(20));
        assert_eq!(due.len(), 1);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancel() {
        let now = Instant::now();
        let mut timers = Timers::new();
        let id = timers.schedule(now, Duration::from_millis(5), 1);
        assert_eq!(timers.cancel(id), Some(1));
        assert_eq!(timers.cancel(id), None);
        assert!(timers.take_due(now + Duration::from_secs(1)).is_empty());
        assert_eq!(timers.next_due_in(now), None);
    }

    #[test]
    fn test_huge_delay_clamped() {
        let now = Instant::now();
        let mut timers = Timers::new();
        timers.schedule(now, Duration::MAX, "forever");
        assert_eq!(timers.next_due_in(now), Some(MAX_DELAY));
        assert!(timers.take_due(now + Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn test_clear() {
        let now = Instant::now();
        let mut timers = Timers::new();
        timers.schedule(now, Duration::from_secs(1), 'a');
        timers.schedule(now, Duration::from_secs(2), 'b');
        assert_eq!(timers.clear(), vec!['a', 'b']);
        assert!(timers.is_empty());
    }
}
