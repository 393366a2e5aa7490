/// 注册表错误类型
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("instance '{instance_id}' is already registered for service '{service_name}'")]
    AlreadyRegistered {
        service_name: String,
        instance_id: String,
    },
    #[error("unknown instance '{0}'")]
    NotFound(String),
}
