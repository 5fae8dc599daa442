//! 关键帧类型注册表
//!
//! 序列化时写入类型标签字符串，反序列化时按标签查找读取函数。
//! 内置类型在注册表创建时自动注册，插件类型在启动时调用 `register_keyframe_type`。

use std::any::Any;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::gesture::{ActorKeyframe, MeshGesture};
use crate::{PoseError, Result};

use super::{read_string, write_string};

/// 可按类型标签持久化的对象
pub trait Persist: Any {
    /// 类型标签（写入流中，用于查找读取函数）
    fn type_tag(&self) -> &'static str;

    /// 写入对象本体（不含标签）
    fn write_body(&self, out: &mut dyn Write) -> Result<()>;

    /// 转换为 `Box<dyn Any>` 以便向下转型
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// 读取函数
pub type ReadFn = fn(&mut dyn Read) -> Result<Box<dyn Persist>>;

/// 类型标签 -> 读取函数
#[derive(Clone)]
pub struct KeyframeRegistry {
    readers: HashMap<String, ReadFn>,
}

impl KeyframeRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self {
            readers: HashMap::new(),
        }
    }

    /// 注册了内置类型的注册表
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ActorKeyframe::TYPE_TAG, read_actor_keyframe);
        registry.register(MeshGesture::TYPE_TAG, read_mesh_gesture);
        registry
    }

    /// 注册（同名标签覆盖旧的读取函数）
    pub fn register(&mut self, tag: &str, reader: ReadFn) {
        self.readers.insert(tag.to_string(), reader);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.readers.contains_key(tag)
    }

    /// 读取标签和对象本体
    pub fn read_tagged(&self, input: &mut dyn Read) -> Result<Box<dyn Persist>> {
        let tag = read_string(input)?;
        match self.readers.get(&tag) {
            Some(reader) => reader(input),
            None => Err(PoseError::UnknownType(tag)),
        }
    }
}

impl Default for KeyframeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn read_actor_keyframe(input: &mut dyn Read) -> Result<Box<dyn Persist>> {
    Ok(Box::new(ActorKeyframe::read(input)?))
}

fn read_mesh_gesture(input: &mut dyn Read) -> Result<Box<dyn Persist>> {
    Ok(Box::new(MeshGesture::read(input)?))
}

/// 全局注册表实例
static KEYFRAME_REGISTRY: Lazy<RwLock<KeyframeRegistry>> = Lazy::new(|| {
    RwLock::new(KeyframeRegistry::with_defaults())
});

/// 在全局注册表中注册新类型
pub fn register_keyframe_type(tag: &str, reader: ReadFn) {
    KEYFRAME_REGISTRY
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .register(tag, reader);
}

/// 写入标签和对象本体
pub fn write_tagged(value: &dyn Persist, out: &mut dyn Write) -> Result<()> {
    write_string(out, value.type_tag())?;
    value.write_body(out)
}

/// 使用全局注册表读取
pub fn read_tagged(input: &mut dyn Read) -> Result<Box<dyn Persist>> {
    // 读取函数只是函数指针，复制出来后立即释放锁
    let registry = KEYFRAME_REGISTRY.read().unwrap_or_else(|e| e.into_inner()).clone();
    registry.read_tagged(input)
}

/// 使用全局注册表读取并转换为具体类型
pub fn read_tagged_as<T: Persist>(input: &mut dyn Read) -> Result<T> {
    let value = read_tagged(input)?;
    let tag = value.type_tag();
    value
        .into_any()
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| PoseError::Format(format!("Unexpected keyframe type: {}", tag)))
}
