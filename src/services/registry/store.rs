use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::RegistryError;
use super::types::{HealthStatus, InstanceRecord, ServiceInstances, ServiceTable};

// 探测结果写入注册表后的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeApplied {
    Updated(HealthStatus),
    // 连续 CRITICAL 超过 TTL，记录已被驱逐
    Evicted,
    // 记录已不存在（已显式注销）
    Gone,
}

// 进程内服务注册表。健康状态只通过 apply_probe 变更，
// 同一实例的写入由内层 DashMap 的条目锁串行化，不同实例互不竞争。
#[derive(Debug, Clone, Default)]
pub struct Registry {
    table: ServiceTable,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // 注册实例，同名服务下 instance_id 重复时拒绝。
    // 插入期间持有外层条目锁，避免与空服务键的并发回收竞争。
    pub fn register(&self, record: InstanceRecord) -> Result<(), RegistryError> {
        let service_entry = self
            .table
            .entry(record.service_name.clone())
            .or_insert_with(|| Arc::new(DashMap::new()));

        match service_entry.value().entry(record.instance_id.clone()) {
            dashmap::Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered {
                service_name: record.service_name.clone(),
                instance_id: record.instance_id.clone(),
            }),
            dashmap::Entry::Vacant(entry) => {
                tracing::info!(
                    service_name = %record.service_name,
                    instance_id = %record.instance_id,
                    address = %record.authority(),
                    "Registering service instance"
                );
                entry.insert(record);
                Ok(())
            }
        }
    }

    // 按实例 ID 注销。未知 ID 返回 NotFound，调用方按无操作处理
    pub fn deregister(&self, instance_id: &str) -> Result<(), RegistryError> {
        // 先收集再删除，删除时不持有迭代器的分片锁
        let mut found = None;
        for entry in self.table.iter() {
            if entry.value().contains_key(instance_id) {
                found = Some((entry.key().clone(), entry.value().clone()));
                break;
            }
        }

        let Some((service_name, instances)) = found else {
            return Err(RegistryError::NotFound(instance_id.to_string()));
        };

        if instances.remove(instance_id).is_none() {
            // 与 TTL 驱逐竞争时记录可能刚被移除
            return Err(RegistryError::NotFound(instance_id.to_string()));
        }
        self.table
            .remove_if(&service_name, |_, v: &ServiceInstances| v.is_empty());
        tracing::info!(
            service_name = %service_name,
            instance_id = %instance_id,
            "Deregistered service instance"
        );
        Ok(())
    }

    // 获取某服务的全部健康实例。未知服务返回空集而不是错误。
    // 返回值是无序集合，调用方不得依赖迭代顺序。
    pub fn query_healthy(&self, service_name: &str) -> Vec<InstanceRecord> {
        self.table
            .get(service_name)
            .map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|instance| instance.value().health_status == HealthStatus::Passing)
                    .map(|instance| instance.value().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    // 写入一次探测结果。探测失败只转换为状态变更，从不向上传播；
    // 连续 CRITICAL 超过 ttl 时整条记录被驱逐。
    pub fn apply_probe(
        &self,
        service_name: &str,
        instance_id: &str,
        passed: bool,
        ttl: Duration,
    ) -> ProbeApplied {
        let Some(instances) = self.table.get(service_name).map(|e| e.value().clone()) else {
            return ProbeApplied::Gone;
        };

        let mut evict = false;
        {
            let Some(mut record) = instances.get_mut(instance_id) else {
                return ProbeApplied::Gone;
            };

            if passed {
                if record.health_status != HealthStatus::Passing {
                    tracing::info!(
                        service_name = %service_name,
                        instance_id = %instance_id,
                        "Instance is passing health checks"
                    );
                }
                record.health_status = HealthStatus::Passing;
                record.critical_since = None;
                return ProbeApplied::Updated(HealthStatus::Passing);
            }

            if record.health_status != HealthStatus::Critical {
                tracing::warn!(
                    service_name = %service_name,
                    instance_id = %instance_id,
                    "Instance failed health check, marking critical"
                );
            }
            record.health_status = HealthStatus::Critical;
            let since = *record.critical_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= ttl {
                evict = true;
            }
        }

        if evict {
            instances.remove(instance_id);
            self.table
                .remove_if(service_name, |_, v: &ServiceInstances| v.is_empty());
            tracing::warn!(
                service_name = %service_name,
                instance_id = %instance_id,
                ttl_secs = ttl.as_secs(),
                "Instance critical beyond TTL, evicting from registry"
            );
            ProbeApplied::Evicted
        } else {
            ProbeApplied::Updated(HealthStatus::Critical)
        }
    }

    pub fn contains(&self, service_name: &str, instance_id: &str) -> bool {
        self.table
            .get(service_name)
            .map(|entry| entry.value().contains_key(instance_id))
            .unwrap_or(false)
    }
}
