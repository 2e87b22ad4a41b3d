use crate::make_id::make_id;

make_id!(TenantId);
make_id!(NetworkId);
make_id!(DeviceId);
make_id!(PeerId);
make_id!(UserId);
