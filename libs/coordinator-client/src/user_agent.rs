/// Builds the `User-Agent` header sent with every coordinator request, so
/// the coordinator has basic fleet visibility without a separate
/// telemetry channel.
pub fn build(component_name: &str, app_version: &str) -> String {
    let info = os_info::get();
    format!(
        "{}/{} {component_name}/{app_version}",
        info.os_type(),
        info.version()
    )
}
