use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::services::registry::InstanceRecord;

// 可插拔的实例选择策略。输入是一个无序集合，
// 策略不得偏向注册表迭代顺序靠前的实例。
pub trait SelectionPolicy: std::fmt::Debug + Send + Sync {
    fn select<'a>(&self, instances: &'a [InstanceRecord]) -> Option<&'a InstanceRecord>;
}

// 均匀随机选择，每个请求独立，无会话粘性，无共享状态
#[derive(Debug, Default)]
pub struct RandomSelection;

impl SelectionPolicy for RandomSelection {
    fn select<'a>(&self, instances: &'a [InstanceRecord]) -> Option<&'a InstanceRecord> {
        if instances.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..instances.len());
        instances.get(idx)
    }
}

// 轮询选择，游标跨请求共享
#[derive(Debug, Default)]
pub struct RoundRobinSelection {
    cursor: AtomicUsize,
}

impl SelectionPolicy for RoundRobinSelection {
    fn select<'a>(&self, instances: &'a [InstanceRecord]) -> Option<&'a InstanceRecord> {
        if instances.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        instances.get(idx % instances.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn records(n: u16) -> Vec<InstanceRecord> {
        (0..n)
            .map(|i| {
                InstanceRecord::new(
                    format!("i{i}"),
                    "svc".to_string(),
                    "127.0.0.1".to_string(),
                    4000 + i,
                )
            })
            .collect()
    }

    #[test]
    fn empty_set_selects_nothing() {
        assert!(RandomSelection.select(&[]).is_none());
        assert!(RoundRobinSelection::default().select(&[]).is_none());
    }

    #[test]
    fn single_instance_always_selected() {
        let instances = records(1);
        for _ in 0..10 {
            let selected = RandomSelection.select(&instances).unwrap();
            assert_eq!(selected.instance_id, "i0");
        }
    }

    #[test]
    fn round_robin_cycles_through_all() {
        let instances = records(3);
        let policy = RoundRobinSelection::default();

        let picked: Vec<_> = (0..6)
            .map(|_| policy.select(&instances).unwrap().instance_id.clone())
            .collect();
        assert_eq!(picked, vec!["i0", "i1", "i2", "i0", "i1", "i2"]);
    }

    #[test]
    fn random_selection_covers_all_instances() {
        let instances = records(3);
        let mut hits: HashMap<String, usize> = HashMap::new();

        for _ in 0..900 {
            let selected = RandomSelection.select(&instances).unwrap();
            *hits.entry(selected.instance_id.clone()).or_default() += 1;
        }

        // 统计性检验：每个实例都应拿到远多于零的份额
        assert_eq!(hits.len(), 3);
        for (id, count) in hits {
            assert!(count > 150, "instance {id} only selected {count} times");
        }
    }
}
