//! SemanticUnit - 完成した consensus を分解した最小の意味単位
//!
//! 1 unit = 1 つの object 名 + その属性。属性のキーは
//! absolute_location / relative_location / colour / amount / size / shape /
//! material / object_description / other などで、値の形は揃っていない
//! （文字列のこともリストのこともある）ので JSON のまま保持する。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticUnit {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}
