//! Type shape of one value, shared by the code targets.

use packlink_schema::{Field, FieldType, Name};

use crate::error::{GenError, Result};

/// Type information needed to encode, decode or name one value.
#[derive(Clone, Copy)]
pub(crate) struct Shape<'a> {
    pub ty: FieldType,
    pub element: Option<FieldType>,
    pub reference: Option<&'a Name>,
}

impl<'a> Shape<'a> {
    /// The shape of `field`, checked for a complete type: lists name their
    /// element and message or enum values name their type.
    pub fn of(message: &str, field: &'a Field) -> Result<Self> {
        let shape = Shape {
            ty: field.ty,
            element: field.element,
            reference: field.reference.as_ref(),
        };
        let invalid = |reason: &'static str| GenError::InvalidField {
            message: message.to_string(),
            field: field.name.clone(),
            reason,
        };
        let value = match shape.ty {
            FieldType::List => shape.element.ok_or_else(|| invalid("list without an element type"))?,
            ty => ty,
        };
        if value == FieldType::List {
            return Err(invalid("nested lists are not supported"));
        }
        if matches!(value, FieldType::Message | FieldType::Enum) && shape.reference.is_none() {
            return Err(invalid("reference without a type name"));
        }
        Ok(shape)
    }

    /// The shape of one element of a list.
    pub fn element(self) -> Result<Shape<'a>> {
        let ty = self.element.ok_or(GenError::IncompleteType("list element"))?;
        Ok(Shape {
            ty,
            element: None,
            reference: self.reference,
        })
    }

    /// The message or enum this value names.
    pub fn reference(self) -> Result<&'a Name> {
        self.reference.ok_or(GenError::IncompleteType("type reference"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(ty: FieldType, element: Option<FieldType>, reference: Option<Name>) -> Field {
        Field {
            name: "data".to_string(),
            ty,
            element,
            reference,
            optional: false,
            comments: Vec::new(),
            inline_comment: None,
        }
    }

    #[test]
    fn lists_need_an_element_type() {
        let list = field(FieldType::List, None, None);
        assert!(matches!(
            Shape::of("FlashPage", &list),
            Err(GenError::InvalidField { message, field, .. }) if message == "FlashPage" && field == "data"
        ));

        let list = field(FieldType::List, Some(FieldType::U32), None);
        let element = Shape::of("FlashPage", &list).unwrap().element().unwrap();
        assert_eq!(element.ty, FieldType::U32);
    }

    #[test]
    fn references_need_a_name() {
        let bare = field(FieldType::Message, None, None);
        assert!(Shape::of("Outer", &bare).is_err());
        let listed = field(FieldType::List, Some(FieldType::Enum), None);
        assert!(Shape::of("Outer", &listed).is_err());

        let named = field(
            FieldType::List,
            Some(FieldType::Message),
            Some(Name::new("Pong".to_string(), "demo.other".to_string())),
        );
        let shape = Shape::of("Outer", &named).unwrap();
        assert_eq!(shape.element().unwrap().reference().unwrap().name, "Pong");
    }

    #[test]
    fn scalars_have_no_element() {
        let scalar = field(FieldType::U8, None, None);
        let shape = Shape::of("Outer", &scalar).unwrap();
        assert!(matches!(shape.element(), Err(GenError::IncompleteType(_))));
    }
}
