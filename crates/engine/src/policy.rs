use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use jobqueue_core::models::{QueuedJob, SchedulingPolicy};

/// 策略队列
///
/// 引擎持有的纯内存排序结构，同一时刻只存在一个实例，不被任何
/// 其他组件并发访问。四种具体策略以和类型表达，共享统一的
/// `offer` / `next` / `size` / `clear` 契约：
///
/// - `offer` 按任务ID幂等，重复插入同一ID是空操作
/// - `next` 按策略顺序移除并返回下一个任务摘要，不阻塞
///
/// 策略切换时引擎构造新变体，把旧队列逐个 `next` 出来重新 `offer`，
/// 待派发任务的集合不变，顺序按新策略重排。
pub enum PolicyQueue {
    Fcfs(FcfsQueue),
    Sjf(SjfQueue),
    Priority(PriorityQueue),
    RoundRobin(RoundRobinQueue),
}

impl PolicyQueue {
    pub fn new(policy: SchedulingPolicy) -> Self {
        match policy {
            SchedulingPolicy::Fcfs => PolicyQueue::Fcfs(FcfsQueue::default()),
            SchedulingPolicy::Sjf => PolicyQueue::Sjf(SjfQueue::default()),
            SchedulingPolicy::Priority => PolicyQueue::Priority(PriorityQueue::default()),
            SchedulingPolicy::RoundRobin => PolicyQueue::RoundRobin(RoundRobinQueue::default()),
        }
    }

    pub fn policy(&self) -> SchedulingPolicy {
        match self {
            PolicyQueue::Fcfs(_) => SchedulingPolicy::Fcfs,
            PolicyQueue::Sjf(_) => SchedulingPolicy::Sjf,
            PolicyQueue::Priority(_) => SchedulingPolicy::Priority,
            PolicyQueue::RoundRobin(_) => SchedulingPolicy::RoundRobin,
        }
    }

    pub fn offer(&mut self, job: QueuedJob) {
        match self {
            PolicyQueue::Fcfs(q) => q.offer(job),
            PolicyQueue::Sjf(q) => q.offer(job),
            PolicyQueue::Priority(q) => q.offer(job),
            PolicyQueue::RoundRobin(q) => q.offer(job),
        }
    }

    pub fn next(&mut self) -> Option<QueuedJob> {
        match self {
            PolicyQueue::Fcfs(q) => q.next(),
            PolicyQueue::Sjf(q) => q.next(),
            PolicyQueue::Priority(q) => q.next(),
            PolicyQueue::RoundRobin(q) => q.next(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            PolicyQueue::Fcfs(q) => q.ids.len(),
            PolicyQueue::Sjf(q) => q.ids.len(),
            PolicyQueue::Priority(q) => q.ids.len(),
            PolicyQueue::RoundRobin(q) => q.ids.len(),
        }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        match self {
            PolicyQueue::Fcfs(q) => q.ids.contains(&id),
            PolicyQueue::Sjf(q) => q.ids.contains(&id),
            PolicyQueue::Priority(q) => q.ids.contains(&id),
            PolicyQueue::RoundRobin(q) => q.ids.contains(&id),
        }
    }

    pub fn clear(&mut self) {
        match self {
            PolicyQueue::Fcfs(q) => {
                q.jobs.clear();
                q.ids.clear();
            }
            PolicyQueue::Sjf(q) => {
                q.jobs.clear();
                q.ids.clear();
            }
            PolicyQueue::Priority(q) => {
                q.jobs.clear();
                q.ids.clear();
            }
            PolicyQueue::RoundRobin(q) => {
                q.jobs.clear();
                q.ids.clear();
            }
        }
    }
}

/// 先来先服务：按 (created_at, id) 升序
#[derive(Default)]
pub struct FcfsQueue {
    jobs: BTreeMap<(DateTime<Utc>, Uuid), QueuedJob>,
    ids: HashSet<Uuid>,
}

impl FcfsQueue {
    fn offer(&mut self, job: QueuedJob) {
        if self.ids.insert(job.id) {
            self.jobs.insert((job.created_at, job.id), job);
        }
    }

    fn next(&mut self) -> Option<QueuedJob> {
        let (&key, _) = self.jobs.iter().next()?;
        let job = self.jobs.remove(&key)?;
        self.ids.remove(&job.id);
        Some(job)
    }
}

/// 最短作业优先的排序键：预估时长升序，同值按 created_at、id
///
/// estimated_duration 经提交校验保证有限，total_cmp 给出全序。
#[derive(Debug, Clone, PartialEq)]
struct SjfKey {
    estimated_duration: f64,
    created_at: DateTime<Utc>,
    id: Uuid,
}

impl Eq for SjfKey {}

impl PartialOrd for SjfKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SjfKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.estimated_duration
            .total_cmp(&other.estimated_duration)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// 最短作业优先：按 (estimated_duration, created_at, id) 升序
#[derive(Default)]
pub struct SjfQueue {
    jobs: BTreeMap<SjfKey, QueuedJob>,
    ids: HashSet<Uuid>,
}

impl SjfQueue {
    fn offer(&mut self, job: QueuedJob) {
        if self.ids.insert(job.id) {
            let key = SjfKey {
                estimated_duration: job.estimated_duration,
                created_at: job.created_at,
                id: job.id,
            };
            self.jobs.insert(key, job);
        }
    }

    fn next(&mut self) -> Option<QueuedJob> {
        let key = self.jobs.keys().next().cloned()?;
        let job = self.jobs.remove(&key)?;
        self.ids.remove(&job.id);
        Some(job)
    }
}

/// 优先级调度：按 (priority, created_at, id) 升序，1 为最高优先级
#[derive(Default)]
pub struct PriorityQueue {
    jobs: BTreeMap<(i32, DateTime<Utc>, Uuid), QueuedJob>,
    ids: HashSet<Uuid>,
}

impl PriorityQueue {
    fn offer(&mut self, job: QueuedJob) {
        if self.ids.insert(job.id) {
            self.jobs
                .insert((job.priority, job.created_at, job.id), job);
        }
    }

    fn next(&mut self) -> Option<QueuedJob> {
        let (&key, _) = self.jobs.iter().next()?;
        let job = self.jobs.remove(&key)?;
        self.ids.remove(&job.id);
        Some(job)
    }
}

/// 轮转调度：插入顺序出队，任务被取出后若再次进入（重试）排到队尾
///
/// 本模型不抢占运行中的任务，时间片轮转退化为带尾部重入的插入序。
#[derive(Default)]
pub struct RoundRobinQueue {
    jobs: VecDeque<QueuedJob>,
    ids: HashSet<Uuid>,
}

impl RoundRobinQueue {
    fn offer(&mut self, job: QueuedJob) {
        if self.ids.insert(job.id) {
            self.jobs.push_back(job);
        }
    }

    fn next(&mut self) -> Option<QueuedJob> {
        let job = self.jobs.pop_front()?;
        self.ids.remove(&job.id);
        Some(job)
    }
}
