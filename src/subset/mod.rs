//! 基于一致性哈希的子集选择
//!
//! 同一个 selector key 对缓慢变化的候选集合会得到几乎相同的子集，
//! 增删一个候选只替换子集中的少量成员。

use std::collections::HashMap;

use crate::consistent::{Consistent, Member};
use crate::error::Result;

/// 从 `candidates` 中选出至多 `size` 个成员
///
/// 候选数不超过 `size` 时原样返回；结果中每个候选至多出现一次。
pub fn subset<M: Member + Clone>(selector_key: &str, candidates: Vec<M>, size: usize) -> Result<Vec<M>> {
    if candidates.len() <= size {
        return Ok(candidates);
    }

    let mut by_id: HashMap<String, M> = HashMap::with_capacity(candidates.len());
    for candidate in candidates {
        by_id.entry(candidate.member_id()).or_insert(candidate);
    }

    let ring: Consistent<String> = Consistent::new();
    ring.set(by_id.keys().cloned().collect());
    let picked = ring.get_n(selector_key, size)?;
    Ok(picked
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Backend {
        addr: String,
    }

    impl Member for Backend {
        fn member_id(&self) -> String {
            self.addr.clone()
        }
    }

    fn backends(n: usize) -> Vec<Backend> {
        (0..n)
            .map(|i| Backend {
                addr: format!("10.1.{}.{}:8000", i / 200, i % 200),
            })
            .collect()
    }

    #[test]
    fn test_small_candidate_set_is_unchanged() {
        let input = backends(3);
        assert_eq!(subset("key", input.clone(), 3).unwrap(), input);
        assert_eq!(subset("key", input.clone(), 25).unwrap(), input);
    }

    #[test]
    fn test_subset_keeps_original_objects() {
        let input = backends(40);
        let picked = subset("key", input.clone(), 10).unwrap();
        assert_eq!(picked.len(), 10);
        for backend in &picked {
            assert!(input.contains(backend));
        }
        let unique: HashSet<_> = picked.iter().map(|b| b.addr.clone()).collect();
        assert_eq!(unique.len(), 10);
    }

    #[test]
    fn test_subset_is_idempotent() {
        let first: HashSet<_> = subset("key", backends(100), 25).unwrap().into_iter().collect();
        let second: HashSet<_> = subset("key", backends(100), 25).unwrap().into_iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_different_keys_spread_load() {
        let a: HashSet<_> = subset("client-a", backends(100), 10).unwrap().into_iter().collect();
        let b: HashSet<_> = subset("client-b", backends(100), 10).unwrap().into_iter().collect();
        assert_ne!(a, b);
    }

    #[test]
    fn test_bounded_churn_on_random_removal() {
        use rand::Rng;

        let full = backends(60);
        let before: HashSet<_> = subset("stable-key", full.clone(), 20).unwrap().into_iter().collect();
        let mut rng = rand::thread_rng();
        for _ in 0..30 {
            let mut reduced = full.clone();
            reduced.remove(rng.gen_range(0..reduced.len()));
            let after: HashSet<_> = subset("stable-key", reduced, 20).unwrap().into_iter().collect();
            assert!(before.difference(&after).count() <= 1);
        }
    }
}
