use chrono::{DateTime, Duration, Utc};
use std::sync::RwLock;

/// 时钟抽象
///
/// 所有需要读取当前时间的组件都通过该 trait 取时间，
/// 测试中注入 [`ManualClock`] 即可精确控制时间推进。
pub trait Clock: Send + Sync {
    /// 获取当前 UTC 时间
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动时钟（测试用）
///
/// 时间只在调用 [`set`](ManualClock::set) 或
/// [`advance`](ManualClock::advance) 时变化。
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// 创建指向给定时刻的手动时钟
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// 创建指向当前系统时间的手动时钟
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// 设置当前时间
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|e| e.into_inner()) = to;
    }

    /// 前进指定时长
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    /// 前进指定毫秒数
    pub fn advance_millis(&self, millis: i64) {
        self.advance(Duration::milliseconds(millis));
    }

    /// 前进指定秒数
    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_now()
    }
}
