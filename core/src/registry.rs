//! 设备号分配与设备类注册表
//!
//! 进程级的全局状态：在模块初始化时建立，在模块退出时销毁，
//! 作为外部协作者注入驱动，不属于传输协议本身。

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PciepError, PciepResult};

/// 次设备号分配器
#[derive(Debug)]
pub struct MinorAllocator {
    max: u32,
    used: BTreeSet<u32>,
}

impl MinorAllocator {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            used: BTreeSet::new(),
        }
    }

    /// 分配指定的次设备号
    pub fn alloc_exact(&mut self, minor: u32) -> PciepResult<u32> {
        if minor >= self.max {
            error!(
                "invalid minor num(={}), valid range: 0 to {}",
                minor,
                self.max.saturating_sub(1)
            );
            return Err(PciepError::InvalidArgument);
        }
        if self.used.contains(&minor) {
            error!("couldn't allocate minor number(={})", minor);
            return Err(PciepError::Busy);
        }
        self.used.insert(minor);
        Ok(minor)
    }

    pub fn free(&mut self, minor: u32) -> bool {
        self.used.remove(&minor)
    }

    pub fn in_use(&self) -> usize {
        self.used.len()
    }
}

/// 设备类: 记录已创建的设备节点名
#[derive(Debug)]
pub struct DeviceClass {
    name: &'static str,
    nodes: BTreeMap<u32, String>,
}

impl DeviceClass {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            nodes: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 创建设备节点，返回节点名
    pub fn create_node(&mut self, minor: u32) -> PciepResult<String> {
        if self.nodes.contains_key(&minor) {
            return Err(PciepError::Busy);
        }
        let node = format!("{}{}", self.name, minor);
        self.nodes.insert(minor, node.clone());
        Ok(node)
    }

    pub fn destroy_node(&mut self, minor: u32) -> Option<String> {
        self.nodes.remove(&minor)
    }

    pub fn node(&self, minor: u32) -> Option<&str> {
        self.nodes.get(&minor).map(String::as_str)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.values().map(String::as_str)
    }
}

/// 驱动注册表
#[derive(Debug)]
pub struct DriverRegistry {
    pub minors: MinorAllocator,
    pub class: DeviceClass,
}

impl DriverRegistry {
    pub fn new(class_name: &'static str, max_minor: u32) -> Self {
        Self {
            minors: MinorAllocator::new(max_minor),
            class: DeviceClass::new(class_name),
        }
    }

    /// 分配次设备号并创建节点，失败时回滚
    pub fn register(&mut self, minor: u32) -> PciepResult<String> {
        let minor = self.minors.alloc_exact(minor)?;
        match self.class.create_node(minor) {
            Ok(node) => Ok(node),
            Err(e) => {
                self.minors.free(minor);
                Err(e)
            }
        }
    }

    pub fn unregister(&mut self, minor: u32) -> bool {
        let had_node = self.class.destroy_node(minor).is_some();
        let had_minor = self.minors.free(minor);
        had_node || had_minor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_range_checked() {
        let mut minors = MinorAllocator::new(4);
        assert_eq!(minors.alloc_exact(3), Ok(3));
        assert_eq!(minors.alloc_exact(4), Err(PciepError::InvalidArgument));
        assert_eq!(minors.alloc_exact(3), Err(PciepError::Busy));
        assert!(minors.free(3));
        assert!(!minors.free(3));
    }

    #[test]
    fn register_names_nodes() {
        let mut reg = DriverRegistry::new("pciep", 256);
        assert_eq!(reg.register(0).unwrap(), "pciep0");
        assert_eq!(reg.register(2).unwrap(), "pciep2");
        assert_eq!(reg.class.nodes().collect::<Vec<_>>(), ["pciep0", "pciep2"]);
        assert!(reg.unregister(0));
        assert_eq!(reg.class.node(0), None);
        assert_eq!(reg.minors.in_use(), 1);
    }

    #[test]
    fn empty_minor_range_rejects_everything() {
        let mut minors = MinorAllocator::new(0);
        assert_eq!(minors.alloc_exact(0), Err(PciepError::InvalidArgument));
        assert_eq!(minors.in_use(), 0);
    }
}
