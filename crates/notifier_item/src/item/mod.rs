//! The `org.kde.StatusNotifierItem` object: answers property requests and produces the `NewIcon` signal.

use std::fmt::Write as _;

use zbus::MessageType;

use crate::{
    bus::{HandlerResult, MessageHandler},
    message::Message,
    names::{INTROSPECTABLE_INTERFACE, INTROSPECTION_DOCTYPE, ITEM_INTERFACE, ITEM_OBJECT, PROPERTIES_INTERFACE},
    Result,
};

pub mod pixmap;
pub mod property;

use pixmap::PixmapOffsets;
use property::{Property, PropertyMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Get,
    GetAll,
    Introspect,
    /// Any method of the item interface (`Activate`, `ContextMenu`, `Scroll`, ...).
    ItemMethod,
}

/// Interface, member (`None` matches every member) and the request it resolves to.
const REQUESTS: &[(&str, Option<&str>, Request)] = &[
    (PROPERTIES_INTERFACE, Some("Get"), Request::Get),
    (PROPERTIES_INTERFACE, Some("GetAll"), Request::GetAll),
    (INTROSPECTABLE_INTERFACE, Some("Introspect"), Request::Introspect),
    (ITEM_INTERFACE, None, Request::ItemMethod),
];

impl Request {
    fn resolve(interface: &str, member: &str) -> Option<Self> {
        REQUESTS
            .iter()
            .find(|(iface, name, _)| *iface == interface && name.map_or(true, |name| name == member))
            .map(|(_, _, request)| *request)
    }
}

/// A StatusNotifierItem whose icon is a gradient that shifts every time someone looks at it.
#[derive(Debug, Default)]
pub struct StatusNotifierItem {
    offsets: PixmapOffsets,
}

impl StatusNotifierItem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offsets(&self) -> PixmapOffsets {
        self.offsets
    }

    /// The signal telling hosts to fetch the icon again.
    pub fn new_icon_signal(&self) -> Result<Message> {
        Message::signal(ITEM_OBJECT, ITEM_INTERFACE, "NewIcon")
    }

    fn get(&mut self, call: &Message, reply: Message) -> Result<Option<Message>> {
        let Ok((interface, name)) = call.body::<(&str, &str)>() else {
            return Ok(None);
        };
        if interface != ITEM_INTERFACE {
            return Ok(None);
        }
        let Some(property) = Property::from_name(name) else {
            return Ok(None);
        };
        let value = property.value(&mut self.offsets).into_value();
        Ok(Some(reply.with_body(&(value,))?))
    }

    fn get_all(&mut self, call: &Message, reply: Message) -> Result<Option<Message>> {
        let Ok((interface,)) = call.body::<(&str,)>() else {
            return Ok(None);
        };
        if interface != ITEM_INTERFACE {
            return Ok(None);
        }
        let properties = PropertyMap(
            Property::ALL
                .into_iter()
                .map(|property| (property.name(), property.value(&mut self.offsets).into_value()))
                .collect(),
        );
        Ok(Some(reply.with_body(&(properties,))?))
    }

    fn introspect(&self, call: &Message, reply: Message) -> Result<Option<Message>> {
        let xml = match call.path().map(|path| path.as_str()) {
            Some(ITEM_OBJECT) => item_introspection(),
            _ => format!("{}<node/>\n", INTROSPECTION_DOCTYPE),
        };
        Ok(Some(reply.with_body(&(xml,))?))
    }
}

impl MessageHandler for StatusNotifierItem {
    fn handle_message(&mut self, msg: &Message) -> Result<HandlerResult> {
        if let (Some(interface), Some(member)) = (msg.interface(), msg.member()) {
            log::debug!("{} {}", interface, member);
        }
        if msg.message_type() != MessageType::MethodCall {
            return Ok(HandlerResult::NotYetHandled);
        }
        let request = match (msg.interface(), msg.member()) {
            (Some(interface), Some(member)) => Request::resolve(interface.as_str(), member.as_str()),
            _ => None,
        };

        let reply = Message::method_return(msg);
        let reply = match request {
            Some(Request::Get) => self.get(msg, reply)?,
            Some(Request::GetAll) => self.get_all(msg, reply)?,
            Some(Request::Introspect) => self.introspect(msg, reply)?,
            Some(Request::ItemMethod) => Some(reply),
            None => None,
        };
        Ok(match reply {
            Some(reply) => HandlerResult::Handled(Some(reply)),
            None => HandlerResult::NotYetHandled,
        })
    }
}

fn item_introspection() -> String {
    let mut xml = String::from(INTROSPECTION_DOCTYPE);
    xml.push_str("<node>\n");
    xml.push_str("  <interface name=\"org.freedesktop.DBus.Introspectable\">\n");
    xml.push_str("    <method name=\"Introspect\"><arg name=\"xml_data\" type=\"s\" direction=\"out\"/></method>\n");
    xml.push_str("  </interface>\n");
    xml.push_str("  <interface name=\"org.freedesktop.DBus.Properties\">\n");
    xml.push_str("    <method name=\"Get\"><arg name=\"interface_name\" type=\"s\" direction=\"in\"/><arg name=\"property_name\" type=\"s\" direction=\"in\"/><arg name=\"value\" type=\"v\" direction=\"out\"/></method>\n");
    xml.push_str("    <method name=\"GetAll\"><arg name=\"interface_name\" type=\"s\" direction=\"in\"/><arg name=\"properties\" type=\"a{sv}\" direction=\"out\"/></method>\n");
    xml.push_str("  </interface>\n");
    let _ = writeln!(xml, "  <interface name=\"{}\">", ITEM_INTERFACE);
    for property in Property::ALL {
        let _ = writeln!(xml, "    <property name=\"{}\" type=\"{}\" access=\"read\"/>", property.name(), property.signature());
    }
    for method in ["Activate", "SecondaryActivate", "ContextMenu"] {
        let _ = writeln!(
            xml,
            "    <method name=\"{}\"><arg name=\"x\" type=\"i\" direction=\"in\"/><arg name=\"y\" type=\"i\" direction=\"in\"/></method>",
            method
        );
    }
    xml.push_str("    <method name=\"Scroll\"><arg name=\"delta\" type=\"i\" direction=\"in\"/><arg name=\"orientation\" type=\"s\" direction=\"in\"/></method>\n");
    xml.push_str("    <signal name=\"NewIcon\"/>\n");
    xml.push_str("  </interface>\n");
    xml.push_str("</node>\n");
    xml
}

#[cfg(test)]
mod test;
