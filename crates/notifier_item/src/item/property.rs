use serde::{ser::SerializeMap, Serialize, Serializer};
use zbus::zvariant::{ObjectPath, Signature, Type, Value};

use super::pixmap::{Pixmap, PixmapOffsets};

pub const CATEGORY: &str = "ApplicationStatus";
pub const ID: &str = "pulsetray";
pub const TITLE: &str = "Pulse Tray";
pub const STATUS: &str = "Active";
pub const MENU_PATH: &str = "/";

/// The properties of `org.kde.StatusNotifierItem` this item exposes, in the order `GetAll` reports them.
///
/// See the [StatusNotifierItem specification] for their meaning.
///
/// [StatusNotifierItem specification]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierItem/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Category,
    Id,
    Title,
    Status,
    IconThemePath,
    Menu,
    ItemIsMenu,
    IconName,
    IconPixmap,
    AttentionIconName,
    AttentionIconPixmap,
}

impl Property {
    pub const ALL: [Property; 11] = [
        Property::Category,
        Property::Id,
        Property::Title,
        Property::Status,
        Property::IconThemePath,
        Property::Menu,
        Property::ItemIsMenu,
        Property::IconName,
        Property::IconPixmap,
        Property::AttentionIconName,
        Property::AttentionIconPixmap,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Property::Category => "Category",
            Property::Id => "Id",
            Property::Title => "Title",
            Property::Status => "Status",
            Property::IconThemePath => "IconThemePath",
            Property::Menu => "Menu",
            Property::ItemIsMenu => "ItemIsMenu",
            Property::IconName => "IconName",
            Property::IconPixmap => "IconPixmap",
            Property::AttentionIconName => "AttentionIconName",
            Property::AttentionIconPixmap => "AttentionIconPixmap",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|property| property.name() == name)
    }

    /// D-Bus signature of the value, as advertised in introspection data.
    pub fn signature(self) -> &'static str {
        match self {
            Property::Category
            | Property::Id
            | Property::Title
            | Property::Status
            | Property::IconThemePath
            | Property::IconName
            | Property::AttentionIconName => "s",
            Property::Menu => "o",
            Property::ItemIsMenu => "b",
            Property::IconPixmap | Property::AttentionIconPixmap => "a(iiay)",
        }
    }

    /// Compute the current value. Reading [`Property::IconPixmap`] renders a new icon and advances `offsets`.
    pub fn value(self, offsets: &mut PixmapOffsets) -> PropertyValue {
        match self {
            Property::Category => PropertyValue::String(CATEGORY),
            Property::Id => PropertyValue::String(ID),
            Property::Title => PropertyValue::String(TITLE),
            Property::Status => PropertyValue::String(STATUS),
            Property::IconThemePath | Property::IconName | Property::AttentionIconName => PropertyValue::String(""),
            Property::Menu => PropertyValue::ObjectPath(ObjectPath::from_static_str_unchecked(MENU_PATH)),
            Property::ItemIsMenu => PropertyValue::Boolean(false),
            Property::IconPixmap => PropertyValue::PixmapArray(vec![offsets.next_pixmap()]),
            Property::AttentionIconPixmap => PropertyValue::PixmapArray(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(&'static str),
    ObjectPath(ObjectPath<'static>),
    Boolean(bool),
    PixmapArray(Vec<Pixmap>),
}

impl PropertyValue {
    pub fn into_value(self) -> Value<'static> {
        match self {
            PropertyValue::String(s) => Value::from(s),
            PropertyValue::ObjectPath(path) => Value::from(path),
            PropertyValue::Boolean(b) => Value::from(b),
            PropertyValue::PixmapArray(pixmaps) => Value::from(pixmaps.into_iter().map(Pixmap::into_wire).collect::<Vec<_>>()),
        }
    }
}

/// A property dictionary, `a{sv}`, that keeps its entries in insertion order on the wire.
#[derive(Debug, Default)]
pub struct PropertyMap(pub Vec<(&'static str, Value<'static>)>);

impl Serialize for PropertyMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Type for PropertyMap {
    fn signature() -> Signature<'static> {
        Signature::from_static_str_unchecked("a{sv}")
    }
}
