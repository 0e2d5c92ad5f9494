/// Identity of an inbound request, as supplied by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Host name the request was addressed to.
    pub host: String,
    /// Port, 80 unless set.
    pub port: u16,
    /// Mount point of the application, possibly empty.
    pub script_name: String,
    /// Request path below the mount point.
    pub path: String,
}

impl RequestInfo {
    /// Request on port 80 with an empty script name.
    pub fn new(method: impl Into<String>, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            host: host.into(),
            port: 80,
            script_name: String::new(),
            path: path.into(),
        }
    }

    /// Overrides the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the mount point.
    pub fn with_script_name(mut self, script_name: impl Into<String>) -> Self {
        self.script_name = script_name.into();
        self
    }

    /// `GET http://example.com:80/app/orders`
    pub fn root_name(&self) -> String {
        format!(
            "{} http://{}:{}{}{}",
            self.method, self.host, self.port, self.script_name, self.path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_name_joins_all_parts() {
        let info = RequestInfo::new("POST", "shop.local", "/cart")
            .with_port(8080)
            .with_script_name("/app");
        assert_eq!(info.root_name(), "POST http://shop.local:8080/app/cart");
    }
}
