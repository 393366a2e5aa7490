use super::error::RouterError;

// 路由目标：逻辑服务名 + 转发给实例的剩余路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub service_name: String,
    pub subpath: String,
}

// 从 /<serviceName>/<subpath> 中解析路由目标
pub fn extract_target(path: &str) -> Result<RouteTarget, RouterError> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(RouterError::InvalidPath(
            "Path must start with '/'".to_string(),
        ));
    }

    let trimmed = path.trim_start_matches('/');
    let (service_name, rest) = match trimmed.split_once('/') {
        Some((service, rest)) => (service, rest),
        None => (trimmed, ""),
    };

    if service_name.is_empty() {
        return Err(RouterError::InvalidPath("Empty service name".to_string()));
    }

    Ok(RouteTarget {
        service_name: service_name.to_string(),
        subpath: format!("/{rest}"),
    })
}
