//! 一致性哈希环
//!
//! 每个成员按字符串标识在环上放置若干副本（默认 20 个），位置使用 32 位哈希
//! （CRC32 或 FNV-1a）。查找时取第一个严格大于键哈希的位置，越过末尾回绕到起点。
//! 成员增减只影响环上相邻的少量位置，适合做低抖动的子集选择与分片。

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use crate::error::{DiscoveryError, Result};

/// 每个成员的默认副本数
pub const DEFAULT_REPLICAS: usize = 20;

/// 可放入哈希环的成员
pub trait Member {
    /// 稳定的字符串标识
    fn member_id(&self) -> String;
}

impl Member for String {
    fn member_id(&self) -> String {
        self.clone()
    }
}

impl Member for &str {
    fn member_id(&self) -> String {
        (*self).to_string()
    }
}

/// 环位置使用的哈希函数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashKind {
    #[default]
    Crc32,
    Fnv1a,
}

impl HashKind {
    pub fn hash(&self, key: &str) -> u32 {
        match self {
            HashKind::Crc32 => crc32fast::hash(key.as_bytes()),
            HashKind::Fnv1a => fnv1a(key.as_bytes()),
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    bytes.iter().fold(OFFSET_BASIS, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(PRIME)
    })
}

struct Ring<M> {
    /// 哈希位置 -> 成员标识
    circle: HashMap<u32, String>,
    /// 已排序的哈希位置
    sorted: Vec<u32>,
    members: BTreeMap<String, M>,
}

impl<M> Ring<M> {
    fn new() -> Self {
        Self {
            circle: HashMap::new(),
            sorted: Vec::new(),
            members: BTreeMap::new(),
        }
    }

    fn rebuild_sorted(&mut self) {
        self.sorted = self.circle.keys().copied().collect();
        self.sorted.sort_unstable();
    }

    /// 第一个严格大于 `hash` 的位置下标（越界回绕到 0）
    fn search(&self, hash: u32) -> usize {
        let i = self.sorted.partition_point(|&position| position <= hash);
        if i >= self.sorted.len() { 0 } else { i }
    }
}

/// 一致性哈希环
///
/// 读多写少，内部使用读写锁；`add` / `remove` / `set` 会重建排序位置。
pub struct Consistent<M> {
    replicas: usize,
    hash: HashKind,
    ring: RwLock<Ring<M>>,
}

impl<M: Member + Clone> Default for Consistent<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Member + Clone> Consistent<M> {
    /// 使用默认副本数与 CRC32 创建空环
    pub fn new() -> Self {
        Self::with_options(DEFAULT_REPLICAS, HashKind::Crc32)
    }

    pub fn with_options(replicas: usize, hash: HashKind) -> Self {
        Self {
            replicas: replicas.max(1),
            hash,
            ring: RwLock::new(Ring::new()),
        }
    }

    fn replica_key(index: usize, id: &str) -> String {
        format!("{}{}", index, id)
    }

    fn insert(&self, ring: &mut Ring<M>, member: M) {
        let id = member.member_id();
        for i in 0..self.replicas {
            ring.circle
                .insert(self.hash.hash(&Self::replica_key(i, &id)), id.clone());
        }
        ring.members.insert(id, member);
    }

    fn erase(&self, ring: &mut Ring<M>, id: &str) {
        if ring.members.remove(id).is_none() {
            return;
        }
        for i in 0..self.replicas {
            let position = self.hash.hash(&Self::replica_key(i, id));
            // 哈希碰撞时位置可能已被其他成员占用
            if ring.circle.get(&position).is_some_and(|owner| owner == id) {
                ring.circle.remove(&position);
            }
        }
    }

    /// 加入成员（已存在时替换）
    pub fn add(&self, member: M) {
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        self.insert(&mut ring, member);
        ring.rebuild_sorted();
    }

    /// 移除成员
    pub fn remove(&self, id: &str) {
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        self.erase(&mut ring, id);
        ring.rebuild_sorted();
    }

    /// 用给定集合替换全部成员（只增删差异部分）
    pub fn set(&self, members: Vec<M>) {
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        let incoming: HashMap<String, M> = members
            .into_iter()
            .map(|member| (member.member_id(), member))
            .collect();

        let stale: Vec<String> = ring
            .members
            .keys()
            .filter(|id| !incoming.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            self.erase(&mut ring, &id);
        }
        for (_, member) in incoming {
            self.insert(&mut ring, member);
        }
        ring.rebuild_sorted();
    }

    /// 当前全部成员（按标识排序）
    pub fn members(&self) -> Vec<M> {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        ring.members.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .members
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 返回 `key` 落到的成员
    pub fn get(&self, key: &str) -> Result<M> {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        if ring.sorted.is_empty() {
            return Err(DiscoveryError::EmptyCircle);
        }
        let position = ring.sorted[ring.search(self.hash.hash(key))];
        ring.circle
            .get(&position)
            .and_then(|id| ring.members.get(id))
            .cloned()
            .ok_or(DiscoveryError::EmptyCircle)
    }

    /// 从 `key` 的位置顺时针收集至多 `n` 个不同成员
    ///
    /// 结果数量为 `min(n, 成员数)`，顺序为环上的遇到顺序。
    pub fn get_n(&self, key: &str, n: usize) -> Result<Vec<M>> {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        if ring.sorted.is_empty() {
            return Err(DiscoveryError::EmptyCircle);
        }
        let n = n.min(ring.members.len());
        let mut picked: Vec<M> = Vec::with_capacity(n);
        let mut seen: Vec<&str> = Vec::with_capacity(n);

        let start = ring.search(self.hash.hash(key));
        let total = ring.sorted.len();
        for offset in 0..total {
            if picked.len() >= n {
                break;
            }
            let position = ring.sorted[(start + offset) % total];
            let Some(id) = ring.circle.get(&position) else {
                continue;
            };
            if seen.contains(&id.as_str()) {
                continue;
            }
            if let Some(member) = ring.members.get(id) {
                seen.push(id.as_str());
                picked.push(member.clone());
            }
        }
        Ok(picked)
    }
}
